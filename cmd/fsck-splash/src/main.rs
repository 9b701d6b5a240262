//! fsck front-end
//!
//! Runs `/sbin/fsck` against the root device (or the given device) at
//! early boot and forwards its progress to the splash daemon. fsck is
//! asked for machine-readable progress (`-C<fd>` with fd > 0), which it
//! writes as `"<pass> <cur> <max> <device>\n"` reports into a pipe; a
//! 300 ms tick drains the pipe and pushes the parsed state to the
//! daemon's socket.
//!
//! Kernel command line knobs: `fsck.mode=auto|force|skip` controls
//! whether the check runs, `splash`/`rhgb` enables progress forwarding.
//! `/fastboot` and `/forcefsck` work as on any sysvinit.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitCode};

use bootq_core::{wq_error, wq_info, wq_warn};
use nix::sys::signal::{kill, sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::stat::{major, minor, stat, FileStat};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe, Pid};
use splash_wire::{ProgressTracker, SplashClient};

/// How often the progress pipe is drained
const PROGRESS_INTERVAL_USEC: libc::suseconds_t = 300_000;

/// Touched when fsck asks for a quota check on the next boot
const QUOTACHECK_FLAG: &str = "/run/bootq/quotacheck";

#[derive(Default)]
struct Options {
    skip: bool,
    force: bool,
    splash: bool,
}

fn parse_proc_cmdline(opts: &mut Options) {
    let cmdline = match std::fs::read_to_string("/proc/cmdline") {
        Ok(cmdline) => cmdline,
        Err(err) => {
            wq_warn!("failed to read /proc/cmdline, ignoring: {}", err);
            return;
        }
    };

    for word in cmdline.split_whitespace() {
        match word {
            "fsck.mode=auto" => {
                opts.force = false;
                opts.skip = false;
            }
            "fsck.mode=force" => opts.force = true,
            "fsck.mode=skip" => opts.skip = true,
            w if w.starts_with("fsck.mode") => {
                wq_warn!("invalid fsck.mode= parameter, ignoring");
            }
            "rhgb" | "splash" => opts.splash = true,
            _ => {}
        }
    }
}

fn test_files(opts: &mut Options) {
    if std::path::Path::new("/fastboot").exists() {
        opts.skip = true;
    }
    if std::path::Path::new("/forcefsck").exists() {
        opts.force = true;
    }
}

enum RootDevice {
    /// Root sits on this block device
    Device(String),

    /// Nothing to check (virtual root, or already writable)
    NoCheckNeeded,

    /// Resolution failed
    Unknown,
}

/// Probe whether `/` is already mounted read-write by re-applying its own
/// timestamps
fn root_is_writable(st: &FileStat) -> bool {
    let times = [
        libc::timespec {
            tv_sec: st.st_atime,
            tv_nsec: st.st_atime_nsec,
        },
        libc::timespec {
            tv_sec: st.st_mtime,
            tv_nsec: st.st_mtime_nsec,
        },
    ];
    let path = b"/\0";
    let r = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            path.as_ptr() as *const libc::c_char,
            times.as_ptr(),
            0,
        )
    };
    r == 0
}

fn device_of_rootdir() -> RootDevice {
    let st = match stat("/") {
        Ok(st) => st,
        Err(err) => {
            wq_error!("failed to stat() the root directory: {}", err);
            return RootDevice::Unknown;
        }
    };

    // Virtual root devices don't need an fsck
    if major(st.st_dev) == 0 {
        return RootDevice::NoCheckNeeded;
    }

    if root_is_writable(&st) {
        wq_info!("root directory is writable, skipping check");
        return RootDevice::NoCheckNeeded;
    }

    let uevent = format!(
        "/sys/dev/block/{}:{}/uevent",
        major(st.st_dev),
        minor(st.st_dev)
    );
    let contents = match std::fs::read_to_string(&uevent) {
        Ok(contents) => contents,
        Err(err) => {
            wq_error!("failed to detect root device: {}", err);
            return RootDevice::Unknown;
        }
    };

    for line in contents.lines() {
        if let Some(name) = line.strip_prefix("DEVNAME=") {
            return RootDevice::Device(format!("/dev/{}", name));
        }
    }

    wq_error!("failed to detect device node of root directory");
    RootDevice::Unknown
}

fn set_nonblocking(fd: i32) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

fn arm_progress_timer(interval_usec: libc::suseconds_t) {
    let tick = libc::timeval {
        tv_sec: 0,
        tv_usec: interval_usec,
    };
    let timer = libc::itimerval {
        it_interval: tick,
        it_value: tick,
    };
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut());
    }
}

fn disarm_progress_timer() {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let timer = libc::itimerval {
        it_interval: zero,
        it_value: zero,
    };
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut());
    }
}

/// Drain everything currently readable from the non-blocking progress
/// pipe
fn drain_progress(pipe: &mut File) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                wq_error!("failed to read fsck progress info: {}", err);
                break;
            }
        }
    }
    buf
}

/// Parse whatever fsck wrote since the last tick and push it to the
/// splash daemon. `finished` sends the empty update that tells the
/// daemon the check is over.
fn push_update(tracker: &mut ProgressTracker, device: &str, pipe: &mut File, finished: bool) {
    let info = if finished {
        String::new()
    } else {
        let buf = drain_progress(pipe);
        if buf.is_empty() {
            return;
        }
        match tracker.feed_report(&buf) {
            Some(info) => info,
            None => return,
        }
    };

    match SplashClient::connect() {
        Ok(client) => {
            let _ = client.send_update(device, &info);
        }
        Err(err) => wq_error!("failed to connect to splash daemon: {}", err),
    }
}

/// Block the signals the watch loop consumes through its signalfd
fn setup_signalfd() -> nix::Result<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGALRM);
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&mask), None)?;
    SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC)
}

/// Forward progress until fsck exits or we are told to stop
fn watch_fsck(child: &Child, device: &str, progress_read: OwnedFd, signal_fd: &mut SignalFd) {
    let pid = Pid::from_raw(child.id() as libc::pid_t);
    let mut tracker = ProgressTracker::new();

    set_nonblocking(progress_read.as_raw_fd());
    let mut pipe = File::from(progress_read);

    arm_progress_timer(PROGRESS_INTERVAL_USEC);

    loop {
        let siginfo = match signal_fd.read_signal() {
            Ok(Some(siginfo)) => siginfo,
            Ok(None) => continue,
            Err(err) => {
                wq_error!("failed to read signalfd: {}", err);
                break;
            }
        };

        match siginfo.ssi_signo as libc::c_int {
            libc::SIGCHLD => {
                // Peek without reaping; the final wait happens later.
                match waitid(
                    Id::Pid(pid),
                    WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT,
                ) {
                    Ok(WaitStatus::StillAlive) => continue,
                    Ok(_) => {
                        push_update(&mut tracker, device, &mut pipe, false);
                        break;
                    }
                    Err(err) => {
                        wq_error!("waitid(): {}", err);
                        break;
                    }
                }
            }
            libc::SIGINT | libc::SIGTERM => {
                wq_info!("received signal, terminating fsck {}", device);
                tracker.set_cancel();
                if let Err(err) = kill(pid, Signal::SIGTERM) {
                    wq_warn!("failed to kill {} (fsck {}): {}", pid, device, err);
                }
            }
            libc::SIGALRM => {
                push_update(&mut tracker, device, &mut pipe, false);
            }
            _ => {}
        }
    }

    // Tell the splash daemon the check is over.
    push_update(&mut tracker, device, &mut pipe, true);

    disarm_progress_timer();
}

fn touch_quotacheck_flag() {
    let _ = std::fs::create_dir_all("/run/bootq");
    if let Err(err) = File::create(QUOTACHECK_FLAG) {
        wq_warn!("failed to touch {}: {}", QUOTACHECK_FLAG, err);
    }
}

fn main() -> ExitCode {
    // Progress text follows the environment locale, not the startup
    // default "C" locale.
    unsafe {
        libc::setlocale(libc::LC_ALL, b"\0".as_ptr() as *const libc::c_char);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() > 1 {
        wq_error!("this program expects one or no arguments");
        return ExitCode::FAILURE;
    }

    let mut opts = Options::default();
    parse_proc_cmdline(&mut opts);
    test_files(&mut opts);

    if !opts.force && opts.skip {
        return ExitCode::SUCCESS;
    }

    let (device, root_directory) = match args.first() {
        Some(device) => (device.clone(), false),
        None => match device_of_rootdir() {
            RootDevice::Device(device) => (device, true),
            RootDevice::NoCheckNeeded => return ExitCode::SUCCESS,
            RootDevice::Unknown => return ExitCode::FAILURE,
        },
    };

    let mut cmd = Command::new("/sbin/fsck");
    cmd.arg("-a").arg("-T").arg("-l");
    if !root_directory {
        cmd.arg("-M");
    }
    if opts.force {
        cmd.arg("-f");
    }

    let mut watch = None;
    if opts.splash {
        // fsck's -CN with N > 0 sends machine-readable progress to fd N.
        let (read_fd, write_fd) = match pipe() {
            Ok(fds) => fds,
            Err(err) => {
                wq_error!("pipe(): {}", err);
                return ExitCode::FAILURE;
            }
        };
        cmd.arg(format!("-C{}", write_fd.as_raw_fd()));

        let signal_fd = match setup_signalfd() {
            Ok(signal_fd) => signal_fd,
            Err(err) => {
                wq_error!("signalfd(): {}", err);
                return ExitCode::FAILURE;
            }
        };

        let read_raw = read_fd.as_raw_fd();
        unsafe {
            cmd.pre_exec(move || {
                // The child gets the default signal mask and must not
                // hold our end of the progress pipe.
                let empty = SigSet::empty();
                sigprocmask(SigmaskHow::SIG_SETMASK, Some(&empty), None)
                    .map_err(io::Error::from)?;
                libc::close(read_raw);
                Ok(())
            });
        }

        watch = Some((read_fd, write_fd, signal_fd));
    }

    cmd.arg(&device);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            wq_error!("failed to spawn /sbin/fsck: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Some((read_fd, write_fd, mut signal_fd)) = watch {
        // Only fsck writes progress; keeping our copy open would hold
        // the pipe forever.
        drop(write_fd);
        watch_fsck(&child, &device, read_fd, &mut signal_fd);
    }

    let status = match child.wait() {
        Ok(status) => status,
        Err(err) => {
            wq_error!("waitpid(): {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut rc = ExitCode::FAILURE;

    if let Some(code) = status.code() {
        // Bit 1 alone means "errors corrected", which is fine.
        if code & !1 != 0 {
            wq_error!("fsck failed with error code {}.", code);
            if code & 2 != 0 && root_directory {
                // The system would need a reboot to pick up the fixed
                // root filesystem.
                wq_error!("root filesystem was modified, reboot required");
            } else if code & 6 != 0 {
                wq_error!("unrecoverable filesystem errors on {}", device);
            } else {
                wq_warn!("ignoring error");
                rc = ExitCode::SUCCESS;
            }
        } else {
            rc = ExitCode::SUCCESS;
        }

        if code & 1 != 0 {
            touch_quotacheck_flag();
        }
    } else if let Some(signal) = status.signal() {
        wq_error!("fsck terminated by signal {}.", signal);
    } else {
        wq_error!("fsck failed due to unknown reason");
    }

    rc
}
