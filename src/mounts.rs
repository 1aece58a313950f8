//! Mount boundary discovery.
//!
//! The walker must not descend onto filesystems the kernel watch API
//! cannot observe reliably (network mounts) or that are pure kernel
//! surface (proc, sysfs, ...). This module derives that prefix set from
//! the running system's mount table; the host merges it into every watch
//! request.

use std::fs;
use std::io;
use std::path::PathBuf;

const MOUNTS_PATH: &str = "/proc/self/mounts";

/// Filesystem types change events can be trusted on. Every mount of any
/// other type becomes a boundary.
const WATCHABLE: &[&str] = &[
    "ext2", "ext3", "ext4", "btrfs", "xfs", "f2fs", "jfs", "reiserfs", "bcachefs", "tmpfs",
    "ramfs", "vfat", "exfat", "ntfs", "ntfs3", "fuseblk", "ecryptfs", "overlay", "zfs",
];

/// Mount prefixes the walker must refuse to cross, per the running
/// system's mount table.
pub fn unwatchable_mounts() -> io::Result<Vec<PathBuf>> {
    Ok(parse_mounts(&fs::read_to_string(MOUNTS_PATH)?))
}

/// Extract unwatchable mount points from mount table text (`fstab(5)`
/// field order: device, mount point, type, options, ...).
pub fn parse_mounts(table: &str) -> Vec<PathBuf> {
    let mut mounts = Vec::new();
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_device), Some(point), Some(kind)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if point == "/" {
            // Refusing to cross the root mount would refuse everything.
            continue;
        }
        if !WATCHABLE.contains(&kind) {
            mounts.push(PathBuf::from(unescape_octal(point)));
        }
    }
    mounts
}

/// Mount points containing spaces, tabs or backslashes appear
/// octal-escaped in the mounts table (`\040` and friends).
fn unescape_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit() && b < b'8') {
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev 0 0
/dev/nvme0n1p3 /home ext4 rw,relatime 0 0
server:/export /mnt/share nfs4 rw,relatime,vers=4.2 0 0
//nas/media /mnt/with\\040space cifs rw,relatime 0 0
";

    #[test]
    fn test_local_filesystems_are_not_boundaries() {
        let mounts = parse_mounts(SAMPLE);
        assert!(!mounts.contains(&PathBuf::from("/home")));
        assert!(!mounts.contains(&PathBuf::from("/run")));
    }

    #[test]
    fn test_pseudo_and_network_filesystems_are_boundaries() {
        let mounts = parse_mounts(SAMPLE);
        assert!(mounts.contains(&PathBuf::from("/proc")));
        assert!(mounts.contains(&PathBuf::from("/sys")));
        assert!(mounts.contains(&PathBuf::from("/mnt/share")));
    }

    #[test]
    fn test_root_mount_is_never_a_boundary() {
        let table = "server:/export / nfs4 rw 0 0\n";
        assert!(parse_mounts(table).is_empty());
    }

    #[test]
    fn test_escaped_mount_points_are_unescaped() {
        let mounts = parse_mounts(SAMPLE);
        assert!(mounts.contains(&PathBuf::from("/mnt/with space")));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(parse_mounts("garbage\n\n/dev/sda1\n").is_empty());
    }
}
