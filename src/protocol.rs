//! Line protocol between the daemon and its host process.
//!
//! Commands arrive on stdin:
//!
//! ```text
//! ROOTS
//! /home/user/project
//! |/var/log
//! #
//! EXIT
//! ```
//!
//! `ROOTS` replaces the active root set; a `|` prefix asks for the root
//! itself without its children. Replies go to stdout, one record per
//! notification, with the path on its own line because paths may contain
//! spaces:
//!
//! ```text
//! CREATE
//! /home/user/project/new.txt
//! MESSAGE watch-limit
//! MISSING
//! /home/user/not-there-yet
//! ```

use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::watcher::{Advisory, ChangeMask};

/// One host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the watched root set.
    Roots(Vec<String>),
    /// Stop the daemon.
    Exit,
}

/// Read the next command, or `None` at end of input. Unrecognized lines
/// are logged and skipped.
pub fn read_command(input: &mut impl BufRead) -> io::Result<Option<Command>> {
    loop {
        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match line.as_str() {
            "ROOTS" => {
                let mut roots = Vec::new();
                loop {
                    match read_line(input)? {
                        // Host hung up mid-command.
                        None => return Ok(None),
                        Some(line) if line == "#" => break,
                        Some(line) if line.is_empty() => continue,
                        Some(line) => roots.push(line),
                    }
                }
                return Ok(Some(Command::Roots(roots)));
            }
            "EXIT" => return Ok(Some(Command::Exit)),
            "" => continue,
            other => tracing::warn!("unrecognized command: {other}"),
        }
    }
}

fn read_line(input: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Event kind label for a change bitmask.
pub fn describe(mask: ChangeMask) -> &'static str {
    if mask.intersects(ChangeMask::CREATE | ChangeMask::MOVED_TO) {
        "CREATE"
    } else if mask.intersects(
        ChangeMask::DELETE | ChangeMask::MOVED_FROM | ChangeMask::DELETE_SELF,
    ) {
        "DELETE"
    } else if mask.contains(ChangeMask::ATTRIB) {
        "STATS"
    } else if mask.contains(ChangeMask::MOVE_SELF) {
        "MOVE"
    } else {
        "CHANGE"
    }
}

/// Write one notification record.
pub fn write_event(out: &mut impl Write, path: &Path, mask: ChangeMask) -> io::Result<()> {
    writeln!(out, "{}", describe(mask))?;
    writeln!(out, "{}", path.display())
}

/// Write a one-shot resource advisory.
pub fn write_advisory(out: &mut impl Write, advisory: Advisory) -> io::Result<()> {
    let label = match advisory {
        Advisory::InstanceLimit => "instance-limit",
        Advisory::WatchLimit => "watch-limit",
    };
    writeln!(out, "MESSAGE {label}")
}

/// Report a root that does not exist yet; the host may retry it later.
pub fn write_missing(out: &mut impl Write, root: &str) -> io::Result<()> {
    writeln!(out, "MISSING")?;
    writeln!(out, "{root}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roots_command_collects_until_terminator() {
        let mut input = Cursor::new("ROOTS\n/home/a\n|/var/log\n#\n");
        let command = read_command(&mut input).unwrap();
        assert_eq!(
            command,
            Some(Command::Roots(vec![
                "/home/a".to_string(),
                "|/var/log".to_string()
            ]))
        );
    }

    #[test]
    fn test_exit_and_end_of_input() {
        let mut input = Cursor::new("EXIT\n");
        assert_eq!(read_command(&mut input).unwrap(), Some(Command::Exit));
        assert_eq!(read_command(&mut input).unwrap(), None);
    }

    #[test]
    fn test_unknown_commands_are_skipped() {
        let mut input = Cursor::new("PING\nEXIT\n");
        assert_eq!(read_command(&mut input).unwrap(), Some(Command::Exit));
    }

    #[test]
    fn test_truncated_roots_reads_as_end_of_input() {
        let mut input = Cursor::new("ROOTS\n/home/a\n");
        assert_eq!(read_command(&mut input).unwrap(), None);
    }

    #[test]
    fn test_describe_prefers_structural_changes() {
        assert_eq!(describe(ChangeMask::CREATE | ChangeMask::ISDIR), "CREATE");
        assert_eq!(describe(ChangeMask::MOVED_TO), "CREATE");
        assert_eq!(describe(ChangeMask::DELETE), "DELETE");
        assert_eq!(describe(ChangeMask::MOVED_FROM), "DELETE");
        assert_eq!(describe(ChangeMask::ATTRIB), "STATS");
        assert_eq!(describe(ChangeMask::MODIFY), "CHANGE");
        assert_eq!(describe(ChangeMask::MOVE_SELF), "MOVE");
    }

    #[test]
    fn test_event_record_puts_the_path_on_its_own_line() {
        let mut out = Vec::new();
        write_event(&mut out, Path::new("/tmp/with space/f.txt"), ChangeMask::MODIFY).unwrap();
        assert_eq!(out, b"CHANGE\n/tmp/with space/f.txt\n");
    }

    #[test]
    fn test_advisories_are_single_line() {
        let mut out = Vec::new();
        write_advisory(&mut out, Advisory::WatchLimit).unwrap();
        write_advisory(&mut out, Advisory::InstanceLimit).unwrap();
        assert_eq!(out, b"MESSAGE watch-limit\nMESSAGE instance-limit\n");
    }
}
