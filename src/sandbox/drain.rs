//! Draining piped stdio of concurrently-running sandboxed children.
//!
//! The helper is always invoked with its own stdin/stdout/stderr piped
//! (§5): whatever the sandboxed process doesn't have redirected to a file
//! flows through here. If nobody reads it, a chatty process fills the pipe
//! buffer and deadlocks against us. This is the one place in the crate that
//! talks to raw file descriptors.

use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::process::{Child, ExitStatus};

const POLL_TIMEOUT_MS: i32 = 1000;
const READ_CHUNK: usize = 8 * 1024;

/// Close every child's stdin, then poll and discard stdout/stderr until all
/// of them are closed (EOF), then reap every child and return its exit
/// status, in the same order as `children`. The full `ExitStatus` (not just
/// the numeric code) is kept so a signal-killed child can still be
/// classified downstream.
pub fn wait_and_drain(children: &mut [Child]) -> anyhow::Result<Vec<ExitStatus>> {
    for child in children.iter_mut() {
        drop(child.stdin.take());
    }

    loop {
        let mut pollfds = Vec::new();
        let mut owners = Vec::new();
        for (idx, child) in children.iter().enumerate() {
            if let Some(out) = child.stdout.as_ref() {
                pollfds.push(libc::pollfd { fd: out.as_raw_fd(), events: libc::POLLIN, revents: 0 });
                owners.push((idx, true));
            }
            if let Some(err) = child.stderr.as_ref() {
                pollfds.push(libc::pollfd { fd: err.as_raw_fd(), events: libc::POLLIN, revents: 0 });
                owners.push((idx, false));
            }
        }

        if pollfds.is_empty() {
            break;
        }

        let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }

        let mut buf = [0u8; READ_CHUNK];
        for (pf, (idx, is_stdout)) in pollfds.iter().zip(owners.iter()) {
            if pf.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
                continue;
            }
            let child = &mut children[*idx];
            let stream: &mut dyn Read = if *is_stdout {
                child.stdout.as_mut().unwrap()
            } else {
                child.stderr.as_mut().unwrap()
            };
            match stream.read(&mut buf) {
                Ok(0) => {
                    if *is_stdout {
                        child.stdout.take();
                    } else {
                        child.stderr.take();
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    let mut statuses = Vec::with_capacity(children.len());
    for child in children.iter_mut() {
        statuses.push(child.wait()?);
    }
    Ok(statuses)
}
