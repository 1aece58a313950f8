//! Daemon context and the tree walker that populates it.

use std::fs;
#[cfg(not(target_os = "linux"))]
use std::io;
#[cfg(unix)]
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::backend::{ChangeRecord, WatchBackend, WatchHandle};
use super::error::{Advisory, InitError, RegisterError};
#[cfg(target_os = "linux")]
use super::inotify::InotifyBackend;
use super::mask::ChangeMask;
use super::table::{WatchNode, WatchTable};

pub(crate) type EventCallback = Box<dyn FnMut(&Path, ChangeMask)>;
pub(crate) type AdvisoryCallback = Box<dyn FnMut(Advisory)>;

/// The watch daemon: one event source, one watch table, one event sink.
///
/// Single-threaded by design. Every operation is synchronous and bounded
/// by filesystem call latency; the only blocking call is
/// [`drain_events`](Self::drain_events), which waits on the event source.
pub struct WatchDaemon {
    pub(crate) backend: Box<dyn WatchBackend>,
    pub(crate) table: WatchTable,
    pub(crate) on_event: Option<EventCallback>,
    on_advisory: Option<AdvisoryCallback>,
    limit_reached: bool,
    /// Reusable batch buffer for event drains.
    pub(crate) batch: Vec<ChangeRecord>,
}

impl WatchDaemon {
    /// Create a builder for configuring the daemon.
    pub fn builder() -> WatchDaemonBuilder {
        WatchDaemonBuilder::new()
    }

    /// Replace the event sink receiving one notification per affected
    /// path alias.
    pub fn set_event_callback(&mut self, callback: impl FnMut(&Path, ChangeMask) + 'static) {
        self.on_event = Some(Box::new(callback));
    }

    /// Replace the sink receiving one-shot resource advisories.
    pub fn set_advisory_callback(&mut self, callback: impl FnMut(Advisory) + 'static) {
        self.on_advisory = Some(Box::new(callback));
    }

    /// Number of live watches.
    pub fn watch_count(&self) -> usize {
        self.table.len()
    }

    /// Kernel ceiling the watch table is sized to.
    pub fn watch_limit(&self) -> usize {
        self.table.capacity()
    }

    /// Pollable descriptor of the event source, for host-side
    /// multiplexing.
    #[cfg(unix)]
    pub fn event_fd(&self) -> Option<RawFd> {
        self.backend.event_fd()
    }

    /// Release the watch table and close the event source.
    ///
    /// Kernel watches are not unwound; `unwatch` roots first when the
    /// process is expected to keep running. Dropping the daemon has the
    /// same effect, and consuming `self` makes a second shutdown
    /// unrepresentable.
    pub fn shutdown(self) {
        debug!("shutting down with {} live watches", self.table.len());
    }

    /// Register `root` and, unless marked otherwise, every directory below
    /// it. A leading `|` watches the root itself without recursing; a
    /// plain file is always watched non-recursively. Paths under any of
    /// the `mounts` prefixes are not descended into.
    ///
    /// Returns the root's handle; pass it to [`unwatch`](Self::unwatch)
    /// to drop the subtree again.
    pub fn watch(&mut self, root: &str, mounts: &[PathBuf]) -> Result<WatchHandle, RegisterError> {
        let (root, marked) = match root.strip_prefix('|') {
            Some(rest) => (rest, true),
            None => (root, false),
        };
        let root = if root.len() > 1 {
            root.strip_suffix('/').unwrap_or(root)
        } else {
            root
        };
        let root = Path::new(root);

        let status = match fs::metadata(root) {
            Ok(status) => status,
            Err(err) => {
                return Err(match err.raw_os_error() {
                    Some(libc::ENOENT) => RegisterError::Missing,
                    Some(libc::EACCES | libc::ELOOP | libc::ENAMETOOLONG | libc::ENOTDIR) => {
                        info!("stat({}): {err}", root.display());
                        RegisterError::Incomplete
                    }
                    _ => {
                        error!("stat({}): {err}", root.display());
                        RegisterError::Fatal {
                            path: root.to_path_buf(),
                            op: "stat",
                            source: err,
                        }
                    }
                });
            }
        };

        let recursive = if status.is_file() {
            false
        } else if status.is_dir() {
            !marked
        } else {
            warn!("unexpected node type: {}", root.display());
            return Err(RegisterError::Ignored);
        };

        self.walk_tree(root, None, recursive, mounts)
    }

    /// Stop watching a subtree previously returned by
    /// [`watch`](Self::watch). Unknown or already-removed handles are a
    /// silent no-op, so repeated calls are safe.
    pub fn unwatch(&mut self, handle: WatchHandle) {
        self.remove_watch(handle, true);
    }

    /// Register a watch for `path` and, when `recursive`, for every
    /// directory below it, attaching new nodes under `parent`.
    pub(crate) fn walk_tree(
        &mut self,
        path: &Path,
        parent: Option<WatchHandle>,
        recursive: bool,
        mounts: &[PathBuf],
    ) -> Result<WatchHandle, RegisterError> {
        for mount in mounts {
            if path.starts_with(mount) {
                debug!(
                    "watch path {} crossed mount point {}, skipping",
                    path.display(),
                    mount.display()
                );
                return Err(RegisterError::Ignored);
            }
        }

        let entries = if recursive {
            match fs::read_dir(path) {
                Ok(entries) => Some(entries),
                Err(err) => {
                    return Err(match err.raw_os_error() {
                        Some(libc::EACCES | libc::ENOENT | libc::ENOTDIR) => {
                            debug!("read_dir({}): {err}", path.display());
                            RegisterError::Ignored
                        }
                        _ => {
                            error!("read_dir({}): {err}", path.display());
                            RegisterError::Incomplete
                        }
                    });
                }
            }
        } else {
            None
        };

        let handle = self.add_watch(path, parent)?;
        let Some(entries) = entries else {
            return Ok(handle);
        };

        let mut child_path = path.to_path_buf();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("read_dir({}): {err}", path.display());
                    continue;
                }
            };
            // Directory-entry type hints, with a stat fallback when the
            // filesystem does not supply them.
            let is_dir = match entry.file_type() {
                Ok(kind) => kind.is_dir(),
                Err(err) => {
                    debug!("file_type({}): {err}", entry.path().display());
                    continue;
                }
            };
            if !is_dir {
                continue;
            }

            child_path.push(entry.file_name());
            let child = self.walk_tree(&child_path, Some(handle), true, mounts);
            child_path.pop();

            if let Err(err @ RegisterError::Fatal { .. }) = child {
                // Never leave a half-registered subtree behind a live
                // parent watch. Ignored and Incomplete stay absorbed per
                // branch.
                self.remove_watch(handle, true);
                return Err(err);
            }
        }

        Ok(handle)
    }

    /// Register one kernel watch and record it in the table, reconciling
    /// against an existing node when the kernel coalesced the path onto a
    /// handle that is already live.
    fn add_watch(
        &mut self,
        path: &Path,
        parent: Option<WatchHandle>,
    ) -> Result<WatchHandle, RegisterError> {
        let handle = match self.backend.add_watch(path) {
            Ok(handle) => handle,
            Err(err) => {
                return Err(match err.raw_os_error() {
                    Some(libc::EACCES | libc::ENOENT) => {
                        debug!("add_watch({}): {err}", path.display());
                        RegisterError::Ignored
                    }
                    Some(libc::ENOSPC) => {
                        warn!("add_watch({}): {err}", path.display());
                        self.signal_watch_limit();
                        RegisterError::Incomplete
                    }
                    _ => {
                        error!("add_watch({}): {err}", path.display());
                        RegisterError::Fatal {
                            path: path.to_path_buf(),
                            op: "add watch",
                            source: err,
                        }
                    }
                });
            }
        };
        debug!("watching {}: {handle}", path.display());

        if self.table.contains(handle) {
            return self.reconcile_alias(handle, path);
        }

        self.table
            .insert(handle, WatchNode::new(parent, path.to_path_buf()))
            .map_err(|source| RegisterError::Fatal {
                path: path.to_path_buf(),
                op: "table insert",
                source,
            })?;

        if let Some(parent) = parent {
            if let Some(node) = self.table.get_mut(parent) {
                node.children.push(Some(handle));
            }
        }

        Ok(handle)
    }

    /// A freshly requested path landed on a handle the table already
    /// knows: either the same directory entry was re-requested, or a hard
    /// link shares the inode. Canonical paths decide which.
    fn reconcile_alias(
        &mut self,
        handle: WatchHandle,
        path: &Path,
    ) -> Result<WatchHandle, RegisterError> {
        let canonical = fs::canonicalize(path).map_err(|source| RegisterError::Fatal {
            path: path.to_path_buf(),
            op: "canonicalize",
            source,
        })?;

        let known: Vec<PathBuf> = match self.table.get(handle) {
            Some(node) => node.paths.clone(),
            None => Vec::new(),
        };
        for existing in &known {
            if existing.as_path() == path {
                debug!("already watching {} at {handle}", path.display());
                return Err(RegisterError::Ignored);
            }
            let existing_canonical =
                fs::canonicalize(existing).map_err(|source| RegisterError::Fatal {
                    path: existing.clone(),
                    op: "canonicalize",
                    source,
                })?;
            if existing_canonical == canonical {
                info!(
                    "intersection at {handle}: new {}, existing {}, real {}",
                    path.display(),
                    existing.display(),
                    canonical.display()
                );
                return Err(RegisterError::Ignored);
            }
        }

        if let Some(node) = self.table.get_mut(handle) {
            info!(
                "shared inode at {handle}: new {}, existing {}",
                path.display(),
                node.primary_path().display()
            );
            node.paths.push(path.to_path_buf());
        }
        Ok(handle)
    }

    /// Tell the host the watch budget is gone. Fires at most once per
    /// run; later exhaustion failures are absorbed silently.
    fn signal_watch_limit(&mut self) {
        if !self.limit_reached {
            self.limit_reached = true;
            if let Some(advise) = self.on_advisory.as_mut() {
                advise(Advisory::WatchLimit);
            }
        }
    }

    /// Drop `handle` and every descendant, pre-order. `update_parent` is
    /// false when the caller already holds the parent's child list and
    /// will tombstone the slot itself.
    pub(crate) fn remove_watch(&mut self, handle: WatchHandle, update_parent: bool) {
        let Some(node) = self.table.take(handle) else {
            return;
        };
        debug!("unwatching {}: {handle}", node.primary_path().display());

        if let Err(err) = self.backend.remove_watch(handle) {
            // Benign: the kernel often drops the watch first.
            debug!(
                "remove_watch({handle}, {}): {err}",
                node.primary_path().display()
            );
        }

        for child in node.children.iter().copied().flatten() {
            self.remove_watch(child, false);
        }

        if update_parent {
            if let Some(parent) = node.parent.and_then(|parent| self.table.get_mut(parent)) {
                if let Some(slot) = parent
                    .children
                    .iter_mut()
                    .find(|slot| **slot == Some(handle))
                {
                    *slot = None;
                }
            }
        }
    }
}

/// Builder for a [`WatchDaemon`].
pub struct WatchDaemonBuilder {
    on_event: Option<EventCallback>,
    on_advisory: Option<AdvisoryCallback>,
    backend: Option<Box<dyn WatchBackend>>,
}

impl WatchDaemonBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            on_event: None,
            on_advisory: None,
            backend: None,
        }
    }

    /// Set the sink receiving one notification per affected path alias.
    pub fn on_event(mut self, callback: impl FnMut(&Path, ChangeMask) + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Set the sink receiving one-shot resource advisories.
    pub fn on_advisory(mut self, callback: impl FnMut(Advisory) + 'static) -> Self {
        self.on_advisory = Some(Box::new(callback));
        self
    }

    /// Substitute the event source. Defaults to the kernel inotify
    /// backend.
    pub fn backend(mut self, backend: Box<dyn WatchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Open the event source, discover the watch limit, and allocate the
    /// watch table.
    pub fn build(mut self) -> Result<WatchDaemon, InitError> {
        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => match Self::default_backend() {
                Ok(backend) => backend,
                Err(err) => {
                    if matches!(err, InitError::InstanceLimit) {
                        if let Some(advise) = self.on_advisory.as_mut() {
                            advise(Advisory::InstanceLimit);
                        }
                    }
                    return Err(err);
                }
            },
        };

        let limit = backend.watch_limit();
        if limit == 0 {
            return Err(InitError::WatchLimit {
                reason: "event source reports no watch budget".to_string(),
            });
        }
        info!("watch descriptors: {limit}");

        Ok(WatchDaemon {
            backend,
            table: WatchTable::new(limit),
            on_event: self.on_event,
            on_advisory: self.on_advisory,
            limit_reached: false,
            batch: Vec::new(),
        })
    }

    #[cfg(target_os = "linux")]
    fn default_backend() -> Result<Box<dyn WatchBackend>, InitError> {
        Ok(Box::new(InotifyBackend::open()?))
    }

    #[cfg(not(target_os = "linux"))]
    fn default_backend() -> Result<Box<dyn WatchBackend>, InitError> {
        Err(InitError::EventSource {
            source: io::Error::new(
                io::ErrorKind::Unsupported,
                "no native event source on this platform",
            ),
        })
    }
}

impl Default for WatchDaemonBuilder {
    fn default() -> Self {
        Self::new()
    }
}
