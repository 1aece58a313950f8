//! The seam between tree bookkeeping and the kernel watch API.

use std::ffi::OsString;
use std::fmt;
use std::io;
#[cfg(unix)]
use std::os::fd::RawFd;
use std::path::Path;

use super::mask::ChangeMask;

/// Kernel-issued token identifying one active watch.
///
/// Unique while the watch is live. The kernel reuses values after removal,
/// so a handle must never outlive its watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One kernel-delivered change record.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Watch the record belongs to.
    pub handle: WatchHandle,
    /// Raw change-kind bits.
    pub mask: ChangeMask,
    /// Name of the affected child entry, when the change concerns one.
    pub name: Option<OsString>,
}

/// Kernel watch interface.
///
/// [`WatchDaemon`](super::WatchDaemon) drives everything through this
/// trait: production uses the inotify-backed implementation, tests
/// substitute a scripted one. Errors carry the raw OS error so callers can
/// classify them by errno.
pub trait WatchBackend {
    /// Register a watch on `path`, returning its handle. Watches on paths
    /// sharing an inode coalesce onto a single handle.
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle>;

    /// Drop a watch. Fails benignly when the kernel already dropped it.
    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()>;

    /// Block until change records are available, appending one batch to
    /// `out`. An empty batch is a valid outcome.
    fn read_batch(&mut self, out: &mut Vec<ChangeRecord>) -> io::Result<()>;

    /// Kernel-imposed ceiling on simultaneously registered watches.
    fn watch_limit(&self) -> usize;

    /// Pollable descriptor of the event source, when one exists.
    #[cfg(unix)]
    fn event_fd(&self) -> Option<RawFd> {
        None
    }
}
