//! Scripted event source for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::backend::{ChangeRecord, WatchBackend, WatchHandle};
use super::daemon::WatchDaemon;
use super::error::Advisory;
use super::mask::ChangeMask;

/// Scripted kernel: hands out deterministic handles, coalesces watches
/// that land on the same inode, and fails on command.
pub(crate) struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

pub(crate) struct MockState {
    next_handle: i32,
    /// inode identity -> handle, mirroring kernel coalescing.
    identities: HashMap<u64, i32>,
    /// Forced identities for paths that should pretend to share an inode.
    forced: HashMap<PathBuf, u64>,
    /// Live handles and the first path each was registered under.
    pub live: HashMap<i32, PathBuf>,
    /// Successful registration count.
    pub adds: usize,
    /// Every add once `adds` reaches the count fails with the errno.
    pub fail_adds_after: Option<(usize, i32)>,
    /// Handles removal was requested for, in order.
    pub removed: Vec<i32>,
    batches: VecDeque<Vec<ChangeRecord>>,
    /// When set, `read_batch` fails with this errno.
    pub read_errno: Option<i32>,
    pub limit: usize,
}

impl MockBackend {
    pub fn new() -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState {
            next_handle: 1,
            identities: HashMap::new(),
            forced: HashMap::new(),
            live: HashMap::new(),
            adds: 0,
            fail_adds_after: None,
            removed: Vec::new(),
            batches: VecDeque::new(),
            read_errno: None,
            limit: 16 * 1024,
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl MockState {
    /// Pretend `paths` are directory entries of one shared inode.
    pub fn share_inode(&mut self, paths: &[&Path]) {
        let identity = 0x8000_0000_0000_0000 | self.forced.len() as u64;
        for path in paths {
            self.forced.insert(path.to_path_buf(), identity);
        }
    }

    /// Queue one batch for the next `read_batch` call.
    pub fn push_batch(&mut self, batch: Vec<ChangeRecord>) {
        self.batches.push_back(batch);
    }

    pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.live
            .iter()
            .find(|(_, live)| live.as_path() == path)
            .map(|(raw, _)| WatchHandle::from_raw(*raw))
    }

    pub fn path_is_live(&self, path: &Path) -> bool {
        self.handle_for(path).is_some()
    }
}

impl WatchBackend for MockBackend {
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let mut state = self.state.borrow_mut();
        if let Some((after, errno)) = state.fail_adds_after {
            if state.adds >= after {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }
        state.adds += 1;

        let identity = match state.forced.get(path) {
            Some(identity) => *identity,
            None => {
                let meta = fs::metadata(path)?;
                (meta.dev() << 32) ^ meta.ino()
            }
        };
        if let Some(raw) = state.identities.get(&identity) {
            return Ok(WatchHandle::from_raw(*raw));
        }

        let raw = state.next_handle;
        state.next_handle += 1;
        state.identities.insert(identity, raw);
        state.live.insert(raw, path.to_path_buf());
        Ok(WatchHandle::from_raw(raw))
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.removed.push(handle.raw());
        if state.live.remove(&handle.raw()).is_none() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        state.identities.retain(|_, raw| *raw != handle.raw());
        Ok(())
    }

    fn read_batch(&mut self, out: &mut Vec<ChangeRecord>) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(errno) = state.read_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if let Some(batch) = state.batches.pop_front() {
            out.extend(batch);
        }
        Ok(())
    }

    fn watch_limit(&self) -> usize {
        self.state.borrow().limit
    }
}

/// A daemon wired to a scripted backend, with every observable side
/// channel captured.
pub(crate) struct Harness {
    pub daemon: WatchDaemon,
    pub state: Rc<RefCell<MockState>>,
    pub events: Rc<RefCell<Vec<(PathBuf, ChangeMask)>>>,
    pub advisories: Rc<RefCell<Vec<Advisory>>>,
}

pub(crate) fn harness() -> Harness {
    let (backend, state) = MockBackend::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let advisories = Rc::new(RefCell::new(Vec::new()));

    let event_sink = Rc::clone(&events);
    let advisory_sink = Rc::clone(&advisories);
    let daemon = WatchDaemon::builder()
        .backend(Box::new(backend))
        .on_event(move |path, mask| event_sink.borrow_mut().push((path.to_path_buf(), mask)))
        .on_advisory(move |advisory| advisory_sink.borrow_mut().push(advisory))
        .build()
        .expect("mock-backed daemon builds");

    Harness {
        daemon,
        state,
        events,
        advisories,
    }
}
