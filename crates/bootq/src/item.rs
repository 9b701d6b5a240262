//! Work items
//!
//! A queue holds three kinds of items: user work, and the two sentinels
//! (barrier, stop) used by the control primitives. The kind is a type
//! query, so nothing downstream has to compare function pointers to
//! decide whether an item may be freed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::queue::{self, QueueInner};

pub(crate) type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// A unit of deferred execution: mandatory work, optional completion
/// notifier, optional cancel callback.
///
/// The work callback runs on an engine thread. The notifier, if set, runs
/// later on whichever thread drives [`run_main_queue`](crate::run_main_queue).
/// The cancel callback fires only if the item is evicted by
/// [`Queue::add_rewind`](crate::Queue::add_rewind) before it ran; an item
/// that reaches execution never sees cancel.
///
/// # Example
///
/// ```ignore
/// q.add(Job::new(|| heavy_lifting()).notify(|| done_on_main_thread()))?;
/// ```
pub struct Job {
    work: Thunk,
    notify: Option<Thunk>,
    cancel: Option<Thunk>,
}

impl Job {
    /// Create a job from its work callback
    pub fn new(work: impl FnOnce() + Send + 'static) -> Job {
        Job {
            work: Box::new(work),
            notify: None,
            cancel: None,
        }
    }

    /// Set the completion notifier, run on the main-queue thread
    pub fn notify(mut self, notify: impl FnOnce() + Send + 'static) -> Job {
        self.notify = Some(Box::new(notify));
        self
    }

    /// Set the cancel callback, run if the job is evicted by rewind
    pub fn cancel(mut self, cancel: impl FnOnce() + Send + 'static) -> Job {
        self.cancel = Some(Box::new(cancel));
        self
    }

    pub(crate) fn into_item(self) -> UserItem {
        UserItem {
            work: Some(self.work),
            notify: self.notify,
            cancel: self.cancel,
        }
    }
}

/// A user item in flight. `work` is taken when executed; the same value
/// then travels to the main queue if a notifier remains to run.
pub(crate) struct UserItem {
    pub(crate) work: Option<Thunk>,
    pub(crate) notify: Option<Thunk>,
    pub(crate) cancel: Option<Thunk>,
}

impl UserItem {
    /// Engine-internal work with no notifier (bucket runners)
    pub(crate) fn internal(work: Thunk) -> UserItem {
        UserItem {
            work: Some(work),
            notify: None,
            cancel: None,
        }
    }
}

/// What a stop sentinel does once it reaches the main queue
pub(crate) enum StopAction {
    /// Explicit `stop()`: report completion to the waiting caller
    Halt(Arc<AtomicBool>),

    /// Last external reference gone: tear the queue down
    Destroy(Arc<QueueInner>),
}

impl StopAction {
    pub(crate) fn complete(self) {
        match self {
            StopAction::Halt(flag) => flag.store(true, Ordering::Release),
            StopAction::Destroy(q) => queue::destroy_queue(q),
        }
    }
}

pub(crate) enum WorkItem {
    User(UserItem),
    Barrier(Arc<AtomicBool>),
    Stop(StopAction),
}

impl WorkItem {
    /// Sentinels belong to the queue's control slot, not to a submitter
    pub(crate) fn is_control(&self) -> bool {
        !matches!(self, WorkItem::User(_))
    }

    pub(crate) fn is_barrier(&self) -> bool {
        matches!(self, WorkItem::Barrier(_))
    }

    pub(crate) fn is_stop(&self) -> bool {
        matches!(self, WorkItem::Stop(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_builder() {
        let job = Job::new(|| {}).notify(|| {}).cancel(|| {});
        let item = job.into_item();
        assert!(item.work.is_some());
        assert!(item.notify.is_some());
        assert!(item.cancel.is_some());
    }

    #[test]
    fn test_item_kind_queries() {
        let user = WorkItem::User(UserItem::internal(Box::new(|| {})));
        assert!(!user.is_control());
        assert!(!user.is_barrier());
        assert!(!user.is_stop());

        let flag = Arc::new(AtomicBool::new(false));
        let barrier = WorkItem::Barrier(Arc::clone(&flag));
        assert!(barrier.is_control());
        assert!(barrier.is_barrier());

        let stop = WorkItem::Stop(StopAction::Halt(flag));
        assert!(stop.is_control());
        assert!(stop.is_stop());
    }

    #[test]
    fn test_halt_action_sets_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        StopAction::Halt(Arc::clone(&flag)).complete();
        assert!(flag.load(Ordering::Acquire));
    }
}
