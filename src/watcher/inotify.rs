//! Real kernel backend built on inotify.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use tracing::debug;

use super::backend::{ChangeRecord, WatchBackend, WatchHandle};
use super::error::InitError;
use super::mask::ChangeMask;

/// Kernel parameter holding the per-user watch ceiling.
const WATCH_COUNT_PATH: &str = "/proc/sys/fs/inotify/max_user_watches";

/// Subscription bits for every watch the daemon registers.
const SUBSCRIPTION: WatchMask = WatchMask::MODIFY
    .union(WatchMask::ATTRIB)
    .union(WatchMask::CREATE)
    .union(WatchMask::DELETE)
    .union(WatchMask::MOVE)
    .union(WatchMask::DELETE_SELF)
    .union(WatchMask::MOVE_SELF);

/// Large enough for one healthy batch of records with names.
const EVENT_BUF_LEN: usize = 64 * 1024;

/// One inotify instance plus the descriptor bookkeeping needed to remove
/// watches by handle.
pub struct InotifyBackend {
    inotify: Inotify,
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
    limit: usize,
    buffer: Vec<u8>,
}

impl InotifyBackend {
    /// Open the event source and discover the kernel watch limit.
    pub fn open() -> Result<Self, InitError> {
        let inotify = Inotify::init().map_err(|source| match source.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) => InitError::InstanceLimit,
            _ => InitError::EventSource { source },
        })?;
        debug!("inotify fd: {}", inotify.as_raw_fd());

        let limit = read_watch_limit()?;
        Ok(Self {
            inotify,
            descriptors: HashMap::new(),
            limit,
            buffer: vec![0u8; EVENT_BUF_LEN],
        })
    }
}

impl WatchBackend for InotifyBackend {
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let descriptor = self.inotify.watches().add(path, SUBSCRIPTION)?;
        let handle = WatchHandle::from_raw(descriptor.get_watch_descriptor_id());
        self.descriptors.insert(handle, descriptor);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        let descriptor = self
            .descriptors
            .remove(&handle)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.inotify.watches().remove(descriptor)
    }

    fn read_batch(&mut self, out: &mut Vec<ChangeRecord>) -> io::Result<()> {
        let events = self.inotify.read_events_blocking(&mut self.buffer)?;
        for event in events {
            let handle = WatchHandle::from_raw(event.wd.get_watch_descriptor_id());
            if event.mask.contains(EventMask::IGNORED) {
                // The kernel already dropped this watch; our descriptor for
                // it is dead either way.
                self.descriptors.remove(&handle);
            }
            out.push(ChangeRecord {
                handle,
                mask: ChangeMask::from_bits_retain(event.mask.bits()),
                name: event.name.map(|name| name.to_os_string()),
            });
        }
        Ok(())
    }

    fn watch_limit(&self) -> usize {
        self.limit
    }

    fn event_fd(&self) -> Option<RawFd> {
        Some(self.inotify.as_raw_fd())
    }
}

fn read_watch_limit() -> Result<usize, InitError> {
    let text = fs::read_to_string(WATCH_COUNT_PATH).map_err(|err| InitError::WatchLimit {
        reason: format!("can't read {WATCH_COUNT_PATH}: {err}"),
    })?;
    let limit: usize = text.trim().parse().map_err(|err| InitError::WatchLimit {
        reason: format!("unparsable value in {WATCH_COUNT_PATH}: {err}"),
    })?;
    if limit == 0 {
        return Err(InitError::WatchLimit {
            reason: format!("{WATCH_COUNT_PATH} reports zero watch descriptors"),
        });
    }
    Ok(limit)
}
