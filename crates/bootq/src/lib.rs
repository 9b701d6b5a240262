//! # bootq
//!
//! An in-process work-queue engine providing three coordinated forms of
//! asynchronous execution:
//!
//! - a process-global **shared pool** for fire-and-forget concurrent jobs,
//! - named private **queues** with serialized execution (width 1),
//! - named **buckets** with bounded parallelism, executed via the shared
//!   pool,
//!
//! all feeding a single-threaded **main queue** that runs completion
//! notifiers back on the caller's thread. The main queue is what makes the
//! engine usable from single-threaded event loops: work happens on engine
//! threads, but every notifier runs wherever [`run_main_queue`] is driven.
//!
//! Capacity is bounded per queue, with an optional overflow-rewrite policy
//! ([`Queue::add_rewind`]) that evicts the oldest queued job. Flush
//! barriers ([`Queue::flush`]) and orderly shutdown via poison items
//! ([`Queue::stop`]) round out the control surface; dropping the last
//! [`Queue`] handle tears the queue down through the same poison
//! mechanism.
//!
//! ```ignore
//! let q = Queue::new("resize-pool", 16);
//! q.add(Job::new(|| recompute()).notify(|| redraw()))?;
//! // ... on the owning thread:
//! run_main_queue(Some(Duration::ZERO));  // runs redraw() here
//! ```

mod exec;
mod globals;
mod item;
mod queue;

pub use bootq_core::error::{QueueError, QueueResult, RunStatus};

pub use exec::run_main_queue;
pub use globals::dump_all;
pub use item::Job;
pub use queue::{Queue, DEFAULT_MAXSIZE, DEFAULT_POOL_WIDTH};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::{Duration, Instant};

    /// The main queue and the shared pool are process-global; scenario
    /// tests must not pump them concurrently.
    static SCENARIO_LOCK: Mutex<()> = Mutex::new(());

    fn scenario_lock() -> std::sync::MutexGuard<'static, ()> {
        SCENARIO_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !pred() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// A gate that parks a worker inside a work callback until opened
    struct Gate {
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl Gate {
        fn new() -> Arc<Gate> {
            Arc::new(Gate {
                open: Mutex::new(false),
                cond: Condvar::new(),
            })
        }

        fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }
    }

    /// Park the queue's single worker so nothing drains while the test
    /// fills the queue.
    fn block_worker(q: &Queue, gate: &Arc<Gate>) {
        let gate = Arc::clone(gate);
        q.add(Job::new(move || gate.wait())).unwrap();
        wait_until("worker to pick up the gate job", || {
            q.running() == 1 && q.is_empty()
        });
    }

    #[test]
    fn test_full_queue_rejects_then_notifies_in_order() {
        let _g = scenario_lock();

        let q = Queue::new("full-scenario", 10);
        let gate = Gate::new();
        block_worker(&q, &gate);

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut accepted = 0;
        let mut rejected = 0;

        for i in 0..30 {
            let log = Arc::clone(&log);
            match q.add(Job::new(|| {}).notify(move || log.lock().unwrap().push(i))) {
                Ok(()) => accepted += 1,
                Err(QueueError::Full) => rejected += 1,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }

        assert_eq!(accepted, 10);
        assert_eq!(rejected, 20);

        gate.open();
        q.flush().unwrap();

        // Width 1 serializes execution, so notifiers land in submission
        // order.
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_rewind_evicts_oldest_and_cancels() {
        let _g = scenario_lock();

        let q = Queue::new("rewind-scenario", 10);
        let gate = Gate::new();
        block_worker(&q, &gate);

        let cancelled = Arc::new(Mutex::new(Vec::new()));
        let notified = Arc::new(Mutex::new(Vec::new()));

        for i in 0..30 {
            let cancelled = Arc::clone(&cancelled);
            let notified = Arc::clone(&notified);
            q.add_rewind(
                Job::new(|| {})
                    .notify(move || notified.lock().unwrap().push(i))
                    .cancel(move || cancelled.lock().unwrap().push(i)),
            )
            .unwrap();
        }

        // Length unchanged by overflow: still exactly at capacity.
        assert_eq!(q.len(), 10);

        gate.open();
        q.flush().unwrap();

        // The oldest 20 were evicted in order; only the last 10 ran.
        assert_eq!(*cancelled.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert_eq!(*notified.lock().unwrap(), (20..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_bucket_bounds_parallelism() {
        let _g = scenario_lock();

        let b = Queue::bucket("width-scenario", 10, 3);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let notified = Arc::new(AtomicUsize::new(0));

        for _ in 0..13 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let notified = Arc::clone(&notified);

            let job = move || {
                let job = Job::new({
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        running.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .notify({
                    let notified = Arc::clone(&notified);
                    move || {
                        notified.fetch_add(1, Ordering::SeqCst);
                    }
                });
                job
            };

            // The bucket drains while we submit; tolerate transient Full.
            loop {
                match b.add(job()) {
                    Ok(()) => break,
                    Err(QueueError::Full) => std::thread::sleep(Duration::from_millis(1)),
                    Err(err) => panic!("unexpected error: {}", err),
                }
            }
        }

        b.flush().unwrap();

        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(notified.load(Ordering::SeqCst), 13);
    }

    fn resubmit(q: Queue, remaining: usize, done: Arc<AtomicBool>) {
        if remaining == 0 {
            done.store(true, Ordering::Release);
            return; // drops the last in-flight handle
        }
        let next = q.clone();
        q.add(Job::new(|| {}).notify(move || resubmit(next, remaining - 1, done)))
            .unwrap();
    }

    #[test]
    fn test_notifier_resubmission_cycle_then_teardown() {
        let _g = scenario_lock();

        let destroyed = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let q = Queue::new("cycle-scenario", 4);
        q.set_destroy_notify({
            let destroyed = Arc::clone(&destroyed);
            move || destroyed.store(true, Ordering::Release)
        });

        resubmit(q.clone(), 5, Arc::clone(&done));
        drop(q);

        wait_until("cycles to drain and the queue to be freed", || {
            run_main_queue(Some(Duration::ZERO));
            destroyed.load(Ordering::Acquire)
        });

        // The queue was freed only after all cycles completed.
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_flush_waits_for_notifiers() {
        let _g = scenario_lock();

        let q = Queue::new("flush-scenario", 32);
        let notified = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let notified = Arc::clone(&notified);
            q.add(Job::new(|| std::thread::sleep(Duration::from_millis(1))).notify(move || {
                notified.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        q.flush().unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_stop_then_reuse() {
        let _g = scenario_lock();

        let q = Queue::new("stop-scenario", 8);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            q.add(Job::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        q.stop().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 4);

        // A stopped queue accepts new work and grows fresh workers.
        let ran2 = Arc::clone(&ran);
        q.add(Job::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        q.flush().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_shared_pool_runs_work() {
        let _g = scenario_lock();

        let pool = Queue::shared();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let ran = Arc::clone(&ran);
            pool.add(Job::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.flush().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_exactly_one_of_notify_or_cancel() {
        let _g = scenario_lock();

        let q = Queue::new("either-scenario", 2);
        let gate = Gate::new();
        block_worker(&q, &gate);

        let fired = Arc::new(AtomicUsize::new(0));

        // Three rewind submissions into capacity 2: the first is evicted.
        for _ in 0..3 {
            let on_notify = Arc::clone(&fired);
            let on_cancel = Arc::clone(&fired);
            q.add_rewind(
                Job::new(|| {})
                    .notify(move || {
                        on_notify.fetch_add(1, Ordering::SeqCst);
                    })
                    .cancel(move || {
                        on_cancel.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        }

        gate.open();
        q.flush().unwrap();

        // Each of the three saw exactly one of its callbacks.
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
