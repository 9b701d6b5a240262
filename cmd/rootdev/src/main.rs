//! Prints the block device backing `/`
//!
//! Virtual root filesystems (device major 0) have no backing device and
//! produce no output; that is not a failure. The devnode is resolved
//! through sysfs: the kernel publishes `DEVNAME=` for every block device
//! under `/sys/dev/block/<major>:<minor>/uevent`.

use std::process::ExitCode;

use bootq_core::wq_error;
use nix::sys::stat::{major, minor, stat};

enum RootDevice {
    /// Root sits on this block device
    Device(String),

    /// Virtual root, no backing device
    NoDevice,

    /// Resolution failed
    Unknown,
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
        return RootDevice::NoDevice;
    }

    devnode_from_sysfs(major(st.st_dev), minor(st.st_dev))
}

fn devnode_from_sysfs(major: u64, minor: u64) -> RootDevice {
    let uevent = format!("/sys/dev/block/{}:{}/uevent", major, minor);
    let contents = match std::fs::read_to_string(&uevent) {
        Ok(contents) => contents,
        Err(err) => {
            wq_error!("failed to read {}: {}", uevent, err);
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

fn main() -> ExitCode {
    match device_of_rootdir() {
        RootDevice::Device(device) => {
            println!("{}", device);
            ExitCode::SUCCESS
        }
        RootDevice::NoDevice => ExitCode::SUCCESS,
        RootDevice::Unknown => ExitCode::FAILURE,
    }
}
