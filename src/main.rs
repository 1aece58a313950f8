//! `fswatchd` binary: wires the watch daemon to a controlling host
//! process over stdin/stdout.
//!
//! The process stays single-threaded: `poll(2)` multiplexes host commands
//! on stdin with the kernel event descriptor, and whichever is ready gets
//! dispatched synchronously.

use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use fswatchd::protocol::{self, Command};
use fswatchd::{logging, mounts, RegisterError, WatchDaemon, WatchHandle};

#[derive(Parser)]
#[command(name = "fswatchd")]
#[command(about = "Native filesystem-watch daemon controlled over stdio")]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "warn", env = "FSWATCHD_LOG")]
    log: String,

    /// Extra mount prefixes that must never be descended into
    #[arg(long = "deny-mount", value_name = "PATH")]
    deny_mounts: Vec<PathBuf>,

    /// Watch these roots immediately instead of waiting for host commands
    #[arg(value_name = "ROOT")]
    roots: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log);

    let mut daemon = WatchDaemon::builder()
        .on_event(|path, mask| {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if let Err(err) = protocol::write_event(&mut out, path, mask).and_then(|()| out.flush())
            {
                tracing::debug!("host notification failed: {err}");
            }
        })
        .on_advisory(|advisory| {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if let Err(err) =
                protocol::write_advisory(&mut out, advisory).and_then(|()| out.flush())
            {
                tracing::debug!("host advisory failed: {err}");
            }
        })
        .build()
        .context("failed to initialize watch daemon")?;

    let mut active: Vec<WatchHandle> = Vec::new();
    if !cli.roots.is_empty() {
        replace_roots(&mut daemon, &mut active, &cli.roots, &cli.deny_mounts)?;
    }

    serve(&mut daemon, &mut active, &cli.deny_mounts)?;
    daemon.shutdown();
    Ok(())
}

/// Tear down the active roots and watch the requested set instead.
fn replace_roots(
    daemon: &mut WatchDaemon,
    active: &mut Vec<WatchHandle>,
    requested: &[String],
    deny: &[PathBuf],
) -> Result<()> {
    for handle in active.drain(..) {
        daemon.unwatch(handle);
    }

    let mut boundaries = mounts::unwatchable_mounts().unwrap_or_else(|err| {
        tracing::warn!("mount table unavailable: {err}");
        Vec::new()
    });
    boundaries.extend(deny.iter().cloned());

    let stdout = io::stdout();
    for root in requested {
        match daemon.watch(root, &boundaries) {
            Ok(handle) => active.push(handle),
            Err(RegisterError::Missing) => {
                let mut out = stdout.lock();
                protocol::write_missing(&mut out, root)?;
                out.flush()?;
            }
            Err(err @ RegisterError::Fatal { .. }) => {
                return Err(err).with_context(|| format!("watch request for {root} failed"));
            }
            Err(err) => tracing::info!("root {root} not fully watched: {err}"),
        }
    }
    tracing::info!(
        "{} roots active, {} of {} watches in use",
        active.len(),
        daemon.watch_count(),
        daemon.watch_limit()
    );
    Ok(())
}

/// Dispatch host commands and kernel events until the host disconnects.
fn serve(daemon: &mut WatchDaemon, active: &mut Vec<WatchHandle>, deny: &[PathBuf]) -> Result<()> {
    let stdin = io::stdin();
    let stdin_fd = stdin.as_raw_fd();
    let event_fd = daemon
        .event_fd()
        .context("event source has no pollable descriptor")?;
    let mut input = BufReader::new(stdin.lock());

    loop {
        let ready = wait_readable(stdin_fd, event_fd, input.buffer().is_empty())?;

        if ready.events {
            daemon.drain_events().context("event drain failed")?;
        }

        if ready.commands {
            match protocol::read_command(&mut input)? {
                None | Some(Command::Exit) => return Ok(()),
                Some(Command::Roots(roots)) => replace_roots(daemon, active, &roots, deny)?,
            }
        }
    }
}

struct Readiness {
    commands: bool,
    events: bool,
}

/// Block until stdin or the event source is readable. Buffered but
/// unparsed command bytes count as readable stdin.
fn wait_readable(stdin_fd: RawFd, event_fd: RawFd, stdin_drained: bool) -> Result<Readiness> {
    if !stdin_drained {
        return Ok(Readiness {
            commands: true,
            events: false,
        });
    }

    let mut fds = [
        libc::pollfd {
            fd: stdin_fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: event_fd,
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err).context("poll failed");
        }
        return Ok(Readiness {
            commands: fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
            events: fds[1].revents & (libc::POLLIN | libc::POLLERR) != 0,
        });
    }
}
