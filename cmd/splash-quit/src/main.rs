//! Asks the splash daemon to quit
//!
//! `splash-quit <timeout in seconds, -1 means forever>`
//!
//! Connects to the daemon and waits. If the daemon has not hung up by the
//! time the timeout expires, it is told to quit (`Q\0`) and we keep
//! waiting for the hangup. A hangup with bytes still readable is not yet
//! a disconnect - the daemon may be flushing its last answer.

use std::io;
use std::os::fd::AsRawFd;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bootq_core::wq_error;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use splash_wire::SplashClient;

/// Upper bound of a single poll round; the deadline is rechecked between
/// rounds
const POLL_CHUNK_MS: u16 = 10_000;

fn bytes_ready(fd: i32) -> i32 {
    let mut ready: libc::c_int = 0;
    let r = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut ready) };
    if r < 0 {
        0
    } else {
        ready
    }
}

fn wait_quit(timeout: Option<Duration>) -> io::Result<()> {
    let client = SplashClient::connect().map_err(|err| {
        wq_error!("failed to connect to splash daemon: {}", err);
        err
    })?;

    let mut deadline = timeout.map(|t| Instant::now() + t);
    let mut connected = true;

    while connected {
        let round = match deadline {
            None => PollTimeout::NONE,
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                let ms = remaining.as_millis().min(POLL_CHUNK_MS as u128) as u16;
                PollTimeout::from(ms)
            }
        };

        let mut fds = [PollFd::new(
            client.fd(),
            PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLIN,
        )];

        let nr = match poll(&mut fds, round) {
            Ok(nr) => nr,
            Err(nix::errno::Errno::EINTR) | Err(nix::errno::Errno::EAGAIN) => continue,
            Err(errno) => return Err(errno.into()),
        };

        if nr > 0 {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR)
                && bytes_ready(client.fd().as_raw_fd()) <= 0
            {
                connected = false;
            }
            continue;
        }

        // A poll round expired; only act once the real deadline passed.
        let timed_out = match deadline {
            None => false,
            Some(at) => Instant::now() >= at,
        };
        if timed_out {
            if let Err(err) = client.send_quit() {
                wq_error!("failed to tell splash daemon to quit: {}", err);
                connected = false;
            }
            // From here on, wait for the hangup however long it takes.
            deadline = None;
        }
    }

    Ok(())
}

fn usage() -> ExitCode {
    println!("Usage: splash-quit <timeout in seconds, -1 means forever>");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let mut args = std::env::args();
    let _prog = args.next();

    let Some(arg) = args.next() else {
        return usage();
    };
    let Ok(seconds) = arg.parse::<i64>() else {
        return usage();
    };

    let timeout = if seconds < 0 {
        None
    } else {
        Some(Duration::from_secs(seconds as u64))
    };

    match wait_quit(timeout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(2),
    }
}
