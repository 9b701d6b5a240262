//! Shutdown broadcaster
//!
//! Clears each of the first six virtual consoles and writes the supplied
//! prompt, so whoever is staring at a tty learns why the box is going
//! down. Consoles that cannot be opened are skipped.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::process::ExitCode;

use bootq_core::wq_error;

const CLEAR_CMD: &[u8] = b"\x1b[H\x1b[2J";

const TTYS: [&str; 6] = [
    "/dev/tty1",
    "/dev/tty2",
    "/dev/tty3",
    "/dev/tty4",
    "/dev/tty5",
    "/dev/tty6",
];

fn main() -> ExitCode {
    let mut args = std::env::args();
    let prog = args.next().unwrap_or_else(|| String::from("shutdown-wall"));

    let Some(prompt) = args.next() else {
        println!("Usage: {} prompt", prog);
        return ExitCode::SUCCESS;
    };
    let prompt = format!("{}\r\n", prompt);

    for tty in TTYS {
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
            .open(tty);

        let mut console = match opened {
            Ok(console) => console,
            Err(_) => continue,
        };

        if let Err(err) = console
            .write_all(CLEAR_CMD)
            .and_then(|()| console.write_all(prompt.as_bytes()))
        {
            wq_error!("failed to write to {}: {}", tty, err);
        }
    }

    ExitCode::SUCCESS
}
