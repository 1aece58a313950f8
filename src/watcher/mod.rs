//! Native filesystem-watch core.
//!
//! # Architecture
//!
//! ```text
//! WatchDaemon
//!   - one WatchBackend (kernel event source)
//!   - one WatchTable (handle -> WatchNode arena)
//!   - one event callback, one advisory callback
//!         |
//!    +-----------+------------+
//!    |           |            |
//! tree walker  event       resource
//! (daemon.rs)  processor   signaling
//!              (events.rs) (one-shot)
//! ```
//!
//! The walker registers subtrees top-down, refusing to cross mount
//! boundaries and reconciling hard-linked directories onto shared
//! handles. The event processor drains one kernel batch at a time,
//! fanning each record out to every path alias and growing or pruning
//! the tree as directories come and go.

mod backend;
mod daemon;
mod error;
mod events;
#[cfg(target_os = "linux")]
mod inotify;
mod mask;
#[cfg(test)]
mod mock;
mod table;

pub use backend::{ChangeRecord, WatchBackend, WatchHandle};
pub use daemon::{WatchDaemon, WatchDaemonBuilder};
pub use error::{Advisory, DrainError, InitError, RegisterError};
#[cfg(target_os = "linux")]
pub use inotify::InotifyBackend;
pub use mask::ChangeMask;
