//! Native filesystem-watch daemon.
//!
//! `fswatchd` mirrors directory subtrees as kernel watches on behalf of a
//! controlling host process: the host names root paths, the daemon keeps a
//! live watch tree over them and streams every creation, deletion,
//! modification and rename back as it happens, growing and pruning the
//! tree as directories appear and disappear. Kernel resource limits are
//! discovered at startup and reported to the host once when hit, after
//! which the daemon keeps running in a degraded mode.
//!
//! The core is [`WatchDaemon`]; the `fswatchd` binary wraps it in a thin
//! line protocol over stdio (see [`protocol`]).

pub mod logging;
pub mod mounts;
pub mod protocol;
pub mod watcher;

#[cfg(target_os = "linux")]
pub use watcher::InotifyBackend;
pub use watcher::{
    Advisory, ChangeMask, ChangeRecord, DrainError, InitError, RegisterError, WatchBackend,
    WatchDaemon, WatchDaemonBuilder, WatchHandle,
};
