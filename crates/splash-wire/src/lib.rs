//! # splash-wire
//!
//! The wire protocol spoken to the splash daemon over its
//! abstract-namespace socket, and the parsing of fsck's progress stream
//! into the text sent there.

mod client;
mod progress;

pub use client::{update_message, SplashClient, SPLASH_SOCKET};
pub use progress::ProgressTracker;
