//! Error types for the work-queue engine

use core::fmt;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur when submitting to or controlling a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at `maxsize` and the submission did not request rewind
    Full,

    /// Worker thread creation failed on a queue with no live threads
    SpawnFailed,

    /// API misuse - e.g. flushing the main queue, rewind into a global queue
    Invalid,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue full"),
            QueueError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            QueueError::Invalid => write!(f, "invalid queue operation"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Outcome of one pass of the queue scheduler primitive
///
/// `run_main_queue` reports `Ran`, `Empty` or `Stopped`; `Busy` is only
/// observed by worker loops while a barrier blocks draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Processed one or more items
    Ran,

    /// No items arrived within the timeout
    Empty,

    /// A barrier at the head is waiting for running items to finish
    Busy,

    /// A stop item was handled
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", QueueError::Full), "queue full");
        assert_eq!(
            format!("{}", QueueError::SpawnFailed),
            "failed to spawn worker thread"
        );
    }

    #[test]
    fn test_run_status_eq() {
        assert_eq!(RunStatus::Ran, RunStatus::Ran);
        assert_ne!(RunStatus::Empty, RunStatus::Stopped);
    }
}
