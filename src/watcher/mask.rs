//! Raw change-kind bits shared with the kernel watch API.

use bitflags::bitflags;

bitflags! {
    /// Change-kind bitmask attached to every notification.
    ///
    /// Values mirror the kernel's inotify bits, so a mask can cross the
    /// host boundary without translation. Unknown bits are preserved
    /// as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeMask: u32 {
        /// File contents were written.
        const MODIFY = 0x0000_0002;
        /// Metadata (permissions, timestamps, link count) changed.
        const ATTRIB = 0x0000_0004;
        /// A directory entry was moved out of the watched directory.
        const MOVED_FROM = 0x0000_0040;
        /// A directory entry was moved into the watched directory.
        const MOVED_TO = 0x0000_0080;
        /// A directory entry was created.
        const CREATE = 0x0000_0100;
        /// A directory entry was deleted.
        const DELETE = 0x0000_0200;
        /// The watched path itself was deleted.
        const DELETE_SELF = 0x0000_0400;
        /// The watched path itself was moved.
        const MOVE_SELF = 0x0000_0800;
        /// The filesystem backing the watched path was unmounted.
        const UNMOUNT = 0x0000_2000;
        /// The kernel event queue overflowed; records were lost.
        const Q_OVERFLOW = 0x0000_4000;
        /// The kernel dropped this watch; its handle is no longer valid.
        const IGNORED = 0x0000_8000;
        /// The subject of the record is a directory.
        const ISDIR = 0x4000_0000;
    }
}

impl ChangeMask {
    /// Bits announcing a new directory entry that needs a subtree walk.
    pub(crate) const ARRIVED: Self = Self::CREATE.union(Self::MOVED_TO);
    /// Bits announcing a departed directory entry that needs pruning.
    pub(crate) const DEPARTED: Self = Self::DELETE.union(Self::MOVED_FROM);
}
