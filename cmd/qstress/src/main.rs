//! Work-queue stress driver
//!
//! Exercises the engine end to end: overfilling a serialized queue and a
//! set of buckets, rewind mode, notifiers that re-submit themselves,
//! flush/stop, handle-drop teardown, and finally stopping the shared
//! pool. State dumps are written to stderr before and after.
//!
//! Knobs: `QSTRESS_MAXSIZE`, `QSTRESS_ITEMS`, `QSTRESS_WORK_MS`.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bootq::{dump_all, run_main_queue, Job, Queue, QueueError, RunStatus};
use bootq_core::env_get;

struct Knobs {
    maxsize: usize,
    n_items: usize,
    work_ms: u64,
}

fn pump_until_quiet() {
    // One worker sleep is the longest anything should take to show up.
    loop {
        match run_main_queue(Some(Duration::from_millis(500))) {
            RunStatus::Empty => break,
            _ => {}
        }
    }
}

/// Fill a queue past capacity with sleeping work; returns how many
/// submissions were accepted before `Full`
fn overfill(q: &Queue, knobs: &Knobs, notified: &Arc<AtomicUsize>) -> usize {
    let mut accepted = 0;

    for i in 0..knobs.n_items {
        if i == knobs.maxsize {
            // Give the executive a moment to start draining, the same
            // way a real producer would outrun the workers only briefly.
            std::thread::sleep(Duration::from_millis(4));
        }

        let work_ms = knobs.work_ms;
        let notified = Arc::clone(notified);
        let job = Job::new(move || std::thread::sleep(Duration::from_millis(work_ms))).notify(
            move || {
                notified.fetch_add(1, Ordering::Relaxed);
            },
        );

        match q.add(job) {
            Ok(()) => accepted += 1,
            Err(QueueError::Full) => {
                println!(
                    "  '{}' full after {} accepted submissions",
                    q.name(),
                    accepted
                );
                break;
            }
            Err(err) => panic!("unexpected error adding to '{}': {}", q.name(), err),
        }
    }

    accepted
}

/// Submissions whose notifier re-submits one plain job through a refed
/// handle
fn add_back_round(q: &Queue, knobs: &Knobs, notified: &Arc<AtomicUsize>) -> usize {
    let mut accepted = 0;

    for i in 0..knobs.n_items {
        if i == knobs.maxsize {
            std::thread::sleep(Duration::from_millis(4));
        }

        let work_ms = knobs.work_ms;
        let handle = q.clone();
        let notified = Arc::clone(notified);

        let job = Job::new(move || std::thread::sleep(Duration::from_millis(work_ms))).notify(
            move || {
                let notified2 = Arc::clone(&notified);
                let r = handle.add(Job::new(|| {}).notify(move || {
                    notified2.fetch_add(1, Ordering::Relaxed);
                }));
                match r {
                    Ok(()) | Err(QueueError::Full) => {}
                    Err(err) => panic!("unexpected add-back error: {}", err),
                }
            },
        );

        match q.add(job) {
            Ok(()) => accepted += 1,
            Err(QueueError::Full) => break,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    accepted
}

fn main() {
    let knobs = Knobs {
        maxsize: env_get("QSTRESS_MAXSIZE", 10),
        n_items: env_get("QSTRESS_ITEMS", 30),
        work_ms: env_get("QSTRESS_WORK_MS", 2),
    };

    println!("=== bootq stress ===\n");
    let start = Instant::now();

    let queue_gone = Arc::new(AtomicBool::new(false));
    let queue = Queue::new("sample-queue", knobs.maxsize);
    queue.set_destroy_notify({
        let queue_gone = Arc::clone(&queue_gone);
        move || {
            queue_gone.store(true, Ordering::Release);
            println!("  queue destroyed");
        }
    });

    let mut buckets = Vec::new();
    let mut buckets_gone = Vec::new();
    for width in 1..=3usize {
        let gone = Arc::new(AtomicBool::new(false));
        let b = Queue::bucket(&format!("sample-bucket[{}]", width), knobs.maxsize, width);
        b.set_destroy_notify({
            let gone = Arc::clone(&gone);
            move || {
                gone.store(true, Ordering::Release);
                println!("  bucket destroyed");
            }
        });
        buckets.push(b);
        buckets_gone.push(gone);
    }

    dump_all(&mut io::stderr()).expect("dump failed");

    println!("Phase 1: overfill the queue and buckets...");
    let notified = Arc::new(AtomicUsize::new(0));
    let mut accepted = overfill(&queue, &knobs, &notified);
    for b in &buckets {
        accepted += overfill(b, &knobs, &notified);
    }
    pump_until_quiet();
    println!(
        "  {} accepted, {} notifiers ran\n",
        accepted,
        notified.load(Ordering::Relaxed)
    );

    println!("Phase 2: rewind mode accepts everything...");
    let notified = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));
    for _ in 0..knobs.n_items {
        let work_ms = knobs.work_ms;
        let n = Arc::clone(&notified);
        let c = Arc::clone(&cancelled);
        queue
            .add_rewind(
                Job::new(move || std::thread::sleep(Duration::from_millis(work_ms)))
                    .notify(move || {
                        n.fetch_add(1, Ordering::Relaxed);
                    })
                    .cancel(move || {
                        c.fetch_add(1, Ordering::Relaxed);
                    }),
            )
            .expect("rewind must not report Full");
    }
    pump_until_quiet();
    println!(
        "  {} submitted, {} notified, {} cancelled\n",
        knobs.n_items,
        notified.load(Ordering::Relaxed),
        cancelled.load(Ordering::Relaxed)
    );

    println!("Phase 3: notifiers that re-submit through a refed handle...");
    let notified = Arc::new(AtomicUsize::new(0));
    let mut accepted = add_back_round(&queue, &knobs, &notified);
    for b in &buckets {
        accepted += add_back_round(b, &knobs, &notified);
    }
    println!("  {} accepted", accepted);

    println!("Phase 4: flush the queue, stop the buckets...");
    queue.flush().expect("flush(queue)");
    for b in &buckets {
        b.stop().expect("stop(bucket)");
    }
    pump_until_quiet();
    println!("  add-back notifiers ran: {}\n", notified.load(Ordering::Relaxed));

    println!("Phase 5: drop the handles, drain the teardown...");
    drop(queue);
    while !queue_gone.load(Ordering::Acquire) {
        run_main_queue(Some(Duration::from_millis(500)));
    }
    drop(buckets);
    while !buckets_gone.iter().all(|gone| gone.load(Ordering::Acquire)) {
        run_main_queue(Some(Duration::from_millis(500)));
    }

    println!("Phase 6: stop the shared pool...");
    Queue::shared().stop().expect("stop(shared)");

    dump_all(&mut io::stderr()).expect("dump failed");
    println!("Finished in {:?}!", start.elapsed());
}
