//! Item execution
//!
//! One scheduler primitive, `run_locked`, serves every queue kind: worker
//! threads loop over it with an idle timeout, and `run_main_queue` runs it
//! once on the caller's thread. Work runs where the item is drained;
//! completion notifiers are re-routed to the main queue so they always run
//! on the thread that drives it.

use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use bootq_core::error::RunStatus;
use bootq_core::qlog;

use crate::globals::globals;
use crate::item::WorkItem;
use crate::queue::{QueueInner, QueueState};

/// Idle worker threads exit after this long without work
pub(crate) const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(65);

/// Drain one or more completion notifiers from the main queue on the
/// calling thread.
///
/// `None` waits forever, `Some(Duration::ZERO)` is non-blocking. Returns
/// [`RunStatus::Empty`] if nothing arrived within the timeout, and
/// [`RunStatus::Stopped`] after handling a forwarded stop item (another
/// queue's teardown) - the main queue itself keeps running.
pub fn run_main_queue(timeout: Option<Duration>) -> RunStatus {
    let main = &globals().main;
    let st = main.state.lock().unwrap();
    let (status, st) = run_locked(main, st, timeout);
    drop(st);
    status
}

fn head_is_blocked_barrier(st: &QueueState) -> bool {
    st.items.front().is_some_and(WorkItem::is_barrier) && st.n_running > 0
}

/// True while there is nothing this thread may drain: the queue is empty,
/// or a barrier at the head waits for running items to finish
fn is_parked(st: &QueueState) -> bool {
    st.items.front().is_none() || head_is_blocked_barrier(st)
}

/// Process one item, entered and left with `q`'s lock held.
///
/// May block on the condition variable if the queue is empty or a barrier
/// holds the head. Outcomes:
///
/// - `Ran`      - processed a user item or a barrier
/// - `Empty`    - no item within the timeout
/// - `Busy`     - a barrier still blocks draining after the wait
/// - `Stopped`  - a stop item was observed
pub(crate) fn run_locked<'q>(
    q: &'q Arc<QueueInner>,
    mut st: MutexGuard<'q, QueueState>,
    timeout: Option<Duration>,
) -> (RunStatus, MutexGuard<'q, QueueState>) {
    let is_main = q.is_main();

    if is_parked(&st) {
        match timeout {
            None => st = q.enqueue.wait(st).unwrap(),
            Some(d) if !d.is_zero() => st = q.enqueue.wait_timeout(st, d).unwrap().0,
            Some(_) => {}
        }

        if st.items.front().is_none() {
            return (RunStatus::Empty, st);
        }
        if head_is_blocked_barrier(&st) {
            return (RunStatus::Busy, st);
        }
    }

    // Stop and barrier are handled without leaving the locked region, so
    // teardown and flush cannot race the sentinel.
    if st.items.front().is_some_and(WorkItem::is_stop) {
        if st.n_threads > 1 {
            // One stop retires one thread at a time; each observer wakes
            // the next waiter until the last thread consumes the item.
            q.enqueue.notify_one();
        } else if let Some(item) = st.items.pop_front() {
            execute_item(item, is_main);
        }
        return (RunStatus::Stopped, st);
    }

    if st.items.front().is_some_and(WorkItem::is_barrier) {
        if let Some(item) = st.items.pop_front() {
            execute_item(item, is_main);
        }
        return (RunStatus::Ran, st);
    }

    let Some(item) = st.items.pop_front() else {
        return (RunStatus::Empty, st);
    };

    st.n_running += 1;
    drop(st);

    execute_item(item, is_main);

    let mut st = q.state.lock().unwrap();
    st.n_running -= 1;

    (RunStatus::Ran, st)
}

/// Run an item's work, or - on the main queue - its notifier.
///
/// A drained item with a pending notifier travels to the main queue
/// unchanged; the intake there ignores capacity, since in-flight items
/// are already bounded by the running counts of every queue.
pub(crate) fn execute_item(item: WorkItem, do_notify: bool) {
    match item {
        WorkItem::User(mut user) => {
            if do_notify {
                if let Some(notify) = user.notify.take() {
                    notify();
                }
            } else {
                if let Some(work) = user.work.take() {
                    work();
                }
                if user.notify.is_some() {
                    push_main(WorkItem::User(user));
                }
            }
        }
        WorkItem::Barrier(reached) => {
            if do_notify {
                reached.store(true, std::sync::atomic::Ordering::Release);
            } else {
                push_main(WorkItem::Barrier(reached));
            }
        }
        WorkItem::Stop(action) => {
            if do_notify {
                action.complete();
            } else {
                push_main(WorkItem::Stop(action));
            }
        }
    }
}

/// Unbounded main-queue intake; cannot fail
fn push_main(item: WorkItem) {
    let main = &globals().main;
    let mut st = main.state.lock().unwrap();
    st.items.push_back(item);
    main.enqueue.notify_one();
}

/// Worker thread body for thread-backed queues
pub(crate) fn worker_main(q: Arc<QueueInner>) {
    qlog::set_current_queue(q.name());

    let mut st = q.state.lock().unwrap();
    loop {
        let (status, guard) = run_locked(&q, st, Some(WORKER_IDLE_TIMEOUT));
        st = guard;
        if matches!(status, RunStatus::Stopped | RunStatus::Empty) {
            break;
        }
    }
    st.n_threads -= 1;
    drop(st);

    qlog::clear_current_queue();
}

/// Bucket runner, executed as a work item on the shared pool.
///
/// Drains the bucket until it is empty or a sentinel holds the head; the
/// last live runner consumes the sentinel in place. Runners never park -
/// a later `add` submits fresh ones.
pub(crate) fn run_bucket(b: Arc<QueueInner>) {
    let mut st = b.state.lock().unwrap();

    loop {
        let head_is_control = match st.items.front() {
            None => break,
            Some(item) => item.is_control(),
        };

        if head_is_control {
            if st.n_running == 1 {
                if let Some(item) = st.items.pop_front() {
                    execute_item(item, false);
                }
            }
            break;
        }

        let Some(item) = st.items.pop_front() else {
            break;
        };
        drop(st);

        execute_item(item, false);

        st = b.state.lock().unwrap();
    }

    st.n_running -= 1;
}
