//! Kernel-style print macros for the work-queue engine
//!
//! Early-boot helpers run before any logging daemon exists, so output goes
//! straight to stderr, printk-style. Each line carries the queue the calling
//! thread is currently serving.
//!
//! # Environment Variables
//!
//! - `BOOTQ_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `BOOTQ_FLUSH_EPRINT=1` - Flush stderr after each print
//! - `BOOTQ_LOG_TIME=1` - Include nanosecond timestamp in output
//!
//! # Output Format
//!
//! Without timestamp: `[LEVEL] [q:<queue>] message`
//! With timestamp:    `[LEVEL] [<ns>] [q:<queue>] message`
//!
//! `[q:--]` means the calling thread is not an engine thread.

use std::cell::RefCell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use crate::env::env_get_bool;

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    START_TIME.get_or_init(Instant::now);

    FLUSH_ENABLED.store(env_get_bool("BOOTQ_FLUSH_EPRINT", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("BOOTQ_LOG_TIME", false), Ordering::Relaxed);

    if let Ok(val) = std::env::var("BOOTQ_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn time_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    TIME_ENABLED.load(Ordering::Relaxed)
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Set timestamp display programmatically
pub fn set_time_enabled(enabled: bool) {
    TIME_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Get elapsed nanoseconds since logging start
#[inline]
pub fn elapsed_ns() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

thread_local! {
    static CURRENT_QUEUE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Set the queue name carried in this thread's log context
///
/// Worker threads and the main-queue driver call this; helper binaries
/// usually leave it unset.
pub fn set_current_queue(name: &str) {
    CURRENT_QUEUE.with(|q| *q.borrow_mut() = Some(name.to_string()));
}

/// Clear the queue context (called on worker thread exit)
pub fn clear_current_queue() {
    CURRENT_QUEUE.with(|q| *q.borrow_mut() = None);
}

fn format_context() -> String {
    CURRENT_QUEUE.with(|q| match &*q.borrow() {
        Some(name) => format!("[q:{}]", name),
        None => "[q:--]".to_string(),
    })
}

#[doc(hidden)]
pub fn _qprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _qprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _qlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = write!(handle, "{} ", level.prefix());

    if time_enabled() {
        let _ = write!(handle, "[{}] ", elapsed_ns());
    }

    let _ = write!(handle, "{} ", format_context());

    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");

    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Print to stderr (no newline, no context)
#[macro_export]
macro_rules! wq_print {
    ($($arg:tt)*) => {{
        $crate::qlog::_qprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline (no context)
#[macro_export]
macro_rules! wq_println {
    () => {{
        $crate::qlog::_qprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::qlog::_qprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log with queue context
#[macro_export]
macro_rules! wq_error {
    ($($arg:tt)*) => {{
        $crate::qlog::_qlog_impl(
            $crate::qlog::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log with queue context
#[macro_export]
macro_rules! wq_warn {
    ($($arg:tt)*) => {{
        $crate::qlog::_qlog_impl(
            $crate::qlog::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log with queue context
#[macro_export]
macro_rules! wq_info {
    ($($arg:tt)*) => {{
        $crate::qlog::_qlog_impl(
            $crate::qlog::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log with queue context
#[macro_export]
macro_rules! wq_debug {
    ($($arg:tt)*) => {{
        $crate::qlog::_qlog_impl(
            $crate::qlog::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log with queue context
#[macro_export]
macro_rules! wq_trace {
    ($($arg:tt)*) => {{
        $crate::qlog::_qlog_impl(
            $crate::qlog::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels_ordered() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(LogLevel::from_u8(0), LogLevel::Off);
        assert_eq!(LogLevel::from_u8(1), LogLevel::Error);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn test_queue_context() {
        CURRENT_QUEUE.with(|q| assert!(q.borrow().is_none()));

        set_current_queue("fsck-pool");
        assert_eq!(format_context(), "[q:fsck-pool]");

        clear_current_queue();
        assert_eq!(format_context(), "[q:--]");
    }

    #[test]
    fn test_programmatic_setters() {
        // Force env initialization first so it cannot clobber the
        // programmatic values below.
        init();

        set_flush_enabled(true);
        assert!(flush_enabled());
        set_flush_enabled(false);
        assert!(!flush_enabled());

        set_time_enabled(true);
        assert!(time_enabled());
        set_time_enabled(false);
        assert!(!time_enabled());
    }

    #[test]
    fn test_macros_compile() {
        set_log_level(LogLevel::Off);

        wq_print!("test");
        wq_println!("test {}", 42);
        wq_error!("error {}", "msg");
        wq_warn!("warn");
        wq_info!("info");
        wq_debug!("debug");
        wq_trace!("trace");
    }
}
