//! Splash-daemon socket client
//!
//! The daemon listens on an abstract-namespace UNIX socket. Updates use
//! the daemon's framed message format; the quit command is a bare `Q\0`.
//! Writes racing a dying daemon are expected during shutdown, so the
//! connection-level errnos are swallowed.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::unistd::write;

/// Abstract-namespace socket path of the splash daemon (leading NUL
/// implied)
pub const SPLASH_SOCKET: &str = "/org/freedesktop/plymouthd";

/// Maximum bytes of one length-prefixed field, trailing NUL included
const FIELD_MAX: usize = 255;

/// Build an update message: `U\x03`, then two length-prefixed
/// NUL-terminated fields - `fsck:<device>` and the progress text. Each
/// length is a single byte counting the NUL.
pub fn update_message(device: &str, info: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + device.len() + info.len() + 8);
    msg.push(b'U');
    msg.push(0x03);
    push_field(&mut msg, format!("fsck:{}", device).as_bytes());
    push_field(&mut msg, info.as_bytes());
    msg
}

fn push_field(msg: &mut Vec<u8>, field: &[u8]) {
    let content = &field[..field.len().min(FIELD_MAX - 1)];
    msg.push((content.len() + 1) as u8);
    msg.extend_from_slice(content);
    msg.push(0);
}

/// One connection to the splash daemon
pub struct SplashClient {
    fd: OwnedFd,
}

impl SplashClient {
    /// Connect to the daemon's abstract socket
    pub fn connect() -> io::Result<SplashClient> {
        let fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        let addr = UnixAddr::new_abstract(SPLASH_SOCKET.as_bytes())?;
        connect(fd.as_raw_fd(), &addr)?;
        Ok(SplashClient { fd })
    }

    /// Send a progress update for a device
    pub fn send_update(&self, device: &str, info: &str) -> io::Result<()> {
        self.send(&update_message(device, info))
    }

    /// Ask the daemon to quit
    pub fn send_quit(&self) -> io::Result<()> {
        self.send(b"Q\0")
    }

    /// Borrow the connection fd (for poll-style waiting)
    pub fn fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.fd.as_fd()
    }

    fn send(&self, msg: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < msg.len() {
            match write(&self.fd, &msg[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) if benign_write_errno(errno) => return Ok(()),
                Err(errno) => return Err(errno.into()),
            }
        }
        Ok(())
    }
}

/// The daemon going away mid-write is part of normal shutdown
fn benign_write_errno(errno: nix::errno::Errno) -> bool {
    use nix::errno::Errno;
    matches!(
        errno,
        Errno::EPIPE
            | Errno::EAGAIN
            | Errno::ENOENT
            | Errno::ECONNREFUSED
            | Errno::ECONNRESET
            | Errno::ECONNABORTED
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_message_framing() {
        let msg = update_message("/dev/sda1", "pass 2");
        assert_eq!(msg[0], b'U');
        assert_eq!(msg[1], 0x03);

        // First field: "fsck:/dev/sda1" + NUL, length counts the NUL
        let label = b"fsck:/dev/sda1";
        assert_eq!(msg[2] as usize, label.len() + 1);
        assert_eq!(&msg[3..3 + label.len()], label);
        assert_eq!(msg[3 + label.len()], 0);

        // Second field follows immediately
        let at = 4 + label.len();
        assert_eq!(msg[at] as usize, "pass 2".len() + 1);
        assert_eq!(&msg[at + 1..at + 7], b"pass 2");
        assert_eq!(*msg.last().unwrap(), 0);
    }

    #[test]
    fn test_update_message_empty_info() {
        // The "fsck finished" update carries empty progress text
        let msg = update_message("/dev/sda1", "");
        assert_eq!(*msg.last().unwrap(), 0);
        assert_eq!(msg[msg.len() - 2], 1); // length byte: just the NUL
    }

    #[test]
    fn test_field_length_capped_at_255() {
        let long = "x".repeat(1000);
        let msg = update_message(&long, "");
        // Length byte may never exceed 255 and content is truncated to fit.
        assert_eq!(msg[2], 255);
        assert_eq!(msg[3 + 254], 0);
    }

    #[test]
    fn test_connect_without_daemon_fails() {
        // No splash daemon in a test environment
        assert!(SplashClient::connect().is_err());
    }
}
