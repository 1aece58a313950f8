//! Error taxonomy and advisory signals of the watch daemon.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from daemon construction.
#[derive(Error, Debug)]
pub enum InitError {
    /// The event source could not be opened.
    #[error("failed to open event source: {source}")]
    EventSource {
        #[source]
        source: io::Error,
    },

    /// The kernel refused another event-source instance for this user.
    #[error("event source instance limit reached")]
    InstanceLimit,

    /// The watch-count limit could not be determined or is unusable.
    #[error("cannot size watch table: {reason}")]
    WatchLimit { reason: String },
}

/// Disposition of a watch registration.
///
/// Only `Fatal` is unrecoverable; the other variants describe roots or
/// branches the daemon deliberately left unwatched while staying healthy.
#[derive(Error, Debug)]
pub enum RegisterError {
    /// The root does not exist yet; the request may be retried later.
    #[error("root path does not exist")]
    Missing,

    /// The path was intentionally skipped: mount crossing, unsupported
    /// node type, duplicate of an existing watch, or a branch that
    /// vanished or denied access mid-walk.
    #[error("path skipped, not watched")]
    Ignored,

    /// Partial success: everything reachable stays watched, but the
    /// request could not be honored in full.
    #[error("subtree watched incompletely")]
    Incomplete,

    /// The watch session cannot continue safely.
    #[error("{op} failed for {path}: {source}")]
    Fatal {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Errors that terminate event draining.
#[derive(Error, Debug)]
pub enum DrainError {
    /// The event source failed to deliver; the daemon has lost its input.
    #[error("event source read failed: {source}")]
    EventSource {
        #[source]
        source: io::Error,
    },

    /// A subtree walk triggered by an event failed unrecoverably.
    #[error("rescan of {path} failed: {source}")]
    Rescan {
        path: PathBuf,
        #[source]
        source: RegisterError,
    },
}

/// One-shot resource advisories reported to the host out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// The kernel refused to create another event-source instance.
    InstanceLimit,
    /// The watch budget is exhausted; new branches are being dropped.
    WatchLimit,
}
