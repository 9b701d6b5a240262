//! Queue objects and the public handle
//!
//! A queue is a bounded FIFO guarded by one mutex, with a condition
//! variable for the thread-backed kinds. The four kinds share a single
//! submission path and differ only in how an executive is prepared for
//! newly queued work: thread-backed queues grow worker threads on demand,
//! buckets borrow the shared pool through runner items, and the main
//! queue is driven by whichever thread calls `run_main_queue`.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use bootq_core::error::{QueueError, QueueResult};
use bootq_core::{wq_debug, wq_warn};

use crate::exec;
use crate::globals::globals;
use crate::item::{Job, StopAction, Thunk, UserItem, WorkItem};

/// Width of the process-global shared pool
pub const DEFAULT_POOL_WIDTH: usize = 32;

/// Capacity of the process-global queues
pub const DEFAULT_MAXSIZE: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    /// Process-global concurrent pool, thread-backed
    Shared,

    /// Process-global cooperative queue, drained by the owning thread
    Main,

    /// Serialized queue (width 1) with its own worker thread
    Private,

    /// Parallel up to `width`, executed via the shared pool
    Bucket,
}

/// Use of the single reserved control-item slot. Flush, stop and
/// self-destruct are mutually exclusive; the engine asserts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlSlot {
    Idle,
    Barrier,
    Stop,
    Destroy,
}

impl ControlSlot {
    fn label(&self) -> &'static str {
        match self {
            ControlSlot::Idle => "<none>",
            ControlSlot::Barrier => "<flush>",
            ControlSlot::Stop => "<stop>",
            ControlSlot::Destroy => "<free>",
        }
    }
}

/// Mutable queue state, all guarded by `QueueInner::state`
pub(crate) struct QueueState {
    /// Queued items, head at the front. `len()` is the item count the
    /// capacity check runs against; sentinels may push it past `maxsize`.
    pub(crate) items: VecDeque<WorkItem>,

    /// Items currently executing (for buckets: live runner items)
    pub(crate) n_running: usize,

    /// Live worker threads (thread-backed kinds only; preset to 1 for the
    /// main queue so the executive never tries to grow it)
    pub(crate) n_threads: usize,

    /// Pending use of the reserved control slot
    pub(crate) control: ControlSlot,
}

pub(crate) struct QueueInner {
    name: Box<str>,
    kind: QueueKind,
    maxsize: usize,
    width: usize,

    /// External reference count - live `Queue` handles. Engine-internal
    /// references (worker threads, in-flight items, the registry) are
    /// plain `Arc` clones and do not count.
    xref: AtomicUsize,

    pub(crate) state: Mutex<QueueState>,
    pub(crate) enqueue: Condvar,

    destroy_notify: Mutex<Option<Thunk>>,
}

impl QueueInner {
    pub(crate) fn new(name: &str, kind: QueueKind, maxsize: usize, width: usize) -> QueueInner {
        QueueInner {
            name: name.into(),
            kind,
            maxsize,
            width,
            xref: AtomicUsize::new(1),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                n_running: 0,
                n_threads: if kind == QueueKind::Main { 1 } else { 0 },
                control: ControlSlot::Idle,
            }),
            enqueue: Condvar::new(),
            destroy_notify: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_main(&self) -> bool {
        self.kind == QueueKind::Main
    }

    pub(crate) fn is_global(&self) -> bool {
        matches!(self.kind, QueueKind::Shared | QueueKind::Main)
    }

    fn is_thread_backed(&self) -> bool {
        matches!(self.kind, QueueKind::Shared | QueueKind::Private)
    }

    /// Make sure something will drain the item about to be queued.
    /// Runs under the queue lock, before the append.
    fn prepare_executive(self: &Arc<Self>, st: &mut QueueState) -> QueueResult<()> {
        match self.kind {
            QueueKind::Main => Ok(()),
            QueueKind::Shared | QueueKind::Private => self.more_thread_locked(st),
            QueueKind::Bucket => self.prepare_runner_locked(st),
        }
    }

    /// Grow the worker set when there is more pending work than idle
    /// capacity. Spawn failure is fatal only with no thread to fall
    /// back on.
    fn more_thread_locked(self: &Arc<Self>, st: &mut QueueState) -> QueueResult<()> {
        let n_threads = st.n_threads;
        let more_thread = n_threads < self.width
            && (n_threads as isize - st.n_running as isize) < st.items.len() as isize + 1;

        if n_threads == 0 || more_thread {
            let q = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name(format!("bootq-{}", self.name))
                .spawn(move || exec::worker_main(q));

            match spawned {
                Ok(handle) => {
                    drop(handle); // workers detach; exit is tracked via n_threads
                    st.n_threads += 1;
                }
                Err(err) => {
                    if n_threads == 0 {
                        return Err(QueueError::SpawnFailed);
                    }
                    wq_warn!(
                        "queue '{}': thread spawn failed, staying at {} workers: {}",
                        self.name,
                        n_threads,
                        err
                    );
                }
            }
        }

        Ok(())
    }

    /// Submit one runner item per free width slot onto the shared pool
    fn prepare_runner_locked(self: &Arc<Self>, st: &mut QueueState) -> QueueResult<()> {
        if st.n_running >= self.width {
            return Ok(());
        }

        let bucket = Arc::clone(self);
        let runner = WorkItem::User(UserItem::internal(Box::new(move || {
            exec::run_bucket(bucket)
        })));

        add_item(&globals().shared, runner, false, false)?;
        st.n_running += 1;

        Ok(())
    }

    fn signal_executive(&self) {
        if self.kind != QueueKind::Bucket {
            self.enqueue.notify_one();
        }
    }
}

/// Append an item, taking the queue lock
pub(crate) fn add_item(
    q: &Arc<QueueInner>,
    item: WorkItem,
    rewind: bool,
    impose_maxsize: bool,
) -> QueueResult<()> {
    let mut st = q.state.lock().unwrap();
    add_item_locked(q, &mut st, item, rewind, impose_maxsize)
}

/// Append an item under the queue lock
///
/// With `rewind`, a full queue evicts its oldest user item first, running
/// the evicted item's cancel callback while the lock is held. Sentinels
/// bypass the capacity check entirely (`impose_maxsize == false`).
pub(crate) fn add_item_locked(
    q: &Arc<QueueInner>,
    st: &mut QueueState,
    item: WorkItem,
    rewind: bool,
    impose_maxsize: bool,
) -> QueueResult<()> {
    let full = impose_maxsize && st.items.len() >= q.maxsize;

    if full && !rewind {
        return Err(QueueError::Full);
    }

    q.prepare_executive(st)?;

    if full {
        // Evict the oldest user item, scanning past any sentinel parked
        // at the head. FIFO order among survivors is untouched.
        if let Some(pos) = st.items.iter().position(|it| !it.is_control()) {
            if let Some(WorkItem::User(mut evicted)) = st.items.remove(pos) {
                if let Some(cancel) = evicted.cancel.take() {
                    cancel();
                }
            }
        }
    }

    st.items.push_back(item);
    q.signal_executive();

    Ok(())
}

/// Block until every user item submitted before the call has completed
/// and had its notifier run
pub(crate) fn flush_inner(q: &Arc<QueueInner>) -> QueueResult<()> {
    let reached = Arc::new(AtomicBool::new(false));

    {
        let mut st = q.state.lock().unwrap();
        assert_eq!(
            st.control,
            ControlSlot::Idle,
            "queue '{}': control item already in use",
            q.name
        );
        st.control = ControlSlot::Barrier;
    }

    let result = loop {
        let mut st = q.state.lock().unwrap();
        if st.n_running == 0 && st.items.is_empty() {
            break Ok(());
        }

        reached.store(false, Ordering::Relaxed);
        let added = add_item_locked(
            q,
            &mut st,
            WorkItem::Barrier(Arc::clone(&reached)),
            false,
            false,
        );
        drop(st);

        if let Err(err) = added {
            break Err(err);
        }

        while !reached.load(Ordering::Acquire) {
            exec::run_main_queue(None);
        }
    };

    q.state.lock().unwrap().control = ControlSlot::Idle;

    result
}

/// Flush, then poison the workers and wait for them to exit
pub(crate) fn stop_inner(q: &Arc<QueueInner>) -> QueueResult<()> {
    flush_inner(q)?;

    // Buckets have no persistent threads; the flush already emptied them.
    if !q.is_thread_backed() {
        return Ok(());
    }

    let stopped = Arc::new(AtomicBool::new(false));
    {
        let mut st = q.state.lock().unwrap();
        assert_eq!(
            st.control,
            ControlSlot::Idle,
            "queue '{}': control item already in use",
            q.name
        );

        if st.n_threads == 0 {
            return Ok(());
        }

        st.control = ControlSlot::Stop;
        let added = add_item_locked(
            q,
            &mut st,
            WorkItem::Stop(StopAction::Halt(Arc::clone(&stopped))),
            false,
            false,
        );
        if let Err(err) = added {
            st.control = ControlSlot::Idle;
            return Err(err);
        }
    }

    while !stopped.load(Ordering::Acquire) {
        exec::run_main_queue(None);
    }

    q.state.lock().unwrap().control = ControlSlot::Idle;

    Ok(())
}

/// Final teardown, run as the notifier of a self-destruct stop on the
/// main-queue thread. The queue has no external handles, its workers
/// have exited, and nothing re-submits to it.
pub(crate) fn destroy_queue(q: Arc<QueueInner>) {
    assert!(!q.is_global());
    assert_eq!(q.xref.load(Ordering::Acquire), 0);

    {
        let st = q.state.lock().unwrap();
        match q.kind {
            QueueKind::Private => {
                assert_eq!(st.n_threads, 0, "queue '{}' freed with live workers", q.name)
            }
            QueueKind::Bucket => {
                assert_eq!(st.n_running, 0, "bucket '{}' freed with live runners", q.name)
            }
            QueueKind::Shared | QueueKind::Main => unreachable!(),
        }
    }

    let g = globals();
    let registry = match q.kind {
        QueueKind::Private => &g.queues,
        QueueKind::Bucket => &g.buckets,
        QueueKind::Shared | QueueKind::Main => unreachable!(),
    };
    registry.lock().unwrap().retain(|entry| !Arc::ptr_eq(entry, &q));

    let notify = q.destroy_notify.lock().unwrap().take();
    wq_debug!("queue '{}' destroyed", q.name());

    drop(q);
    if let Some(notify) = notify {
        notify();
    }
}

/// Counted handle to a queue
///
/// `Clone` takes an external reference, `Drop` releases it. When the last
/// handle goes away the queue drains its remaining items, quits its
/// workers and frees itself on the main queue; the destroy notifier, if
/// set, fires after that. Handles to the process-global queues skip the
/// accounting - those live for the whole process.
///
/// Creation, handle drop and `set_destroy_notify` belong to the
/// main-queue thread; `add` may be called from anywhere.
pub struct Queue {
    pub(crate) inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a private serialized queue (width 1) holding at most
    /// `maxsize` user items
    pub fn new(name: &str, maxsize: usize) -> Queue {
        assert!(maxsize > 0);

        let inner = Arc::new(QueueInner::new(name, QueueKind::Private, maxsize, 1));
        globals().queues.lock().unwrap().push(Arc::clone(&inner));

        Queue { inner }
    }

    /// Create a bucket: FIFO submission, execution on the shared pool
    /// with at most `width` items running at once
    pub fn bucket(name: &str, maxsize: usize, width: usize) -> Queue {
        assert!(maxsize > 0);
        assert!(width > 0);

        let inner = Arc::new(QueueInner::new(name, QueueKind::Bucket, maxsize, width));
        globals().buckets.lock().unwrap().push(Arc::clone(&inner));

        Queue { inner }
    }

    /// Handle to the process-global concurrent pool
    pub fn shared() -> Queue {
        Queue {
            inner: Arc::clone(&globals().shared),
        }
    }

    /// Register a closure invoked after the queue has been freed
    pub fn set_destroy_notify(&self, notify: impl FnOnce() + Send + 'static) {
        *self.inner.destroy_notify.lock().unwrap() = Some(Box::new(notify));
    }

    /// Append a job, honoring `maxsize`. Thread-safe.
    pub fn add(&self, job: Job) -> QueueResult<()> {
        add_item(&self.inner, WorkItem::User(job.into_item()), false, true)
    }

    /// Append a job; if the queue is full, evict the oldest queued job
    /// to make room, invoking its cancel callback. Never reports
    /// [`QueueError::Full`].
    ///
    /// Not permitted on the global queues. The evicted job's cancel
    /// callback runs with the queue lock held and must not call back
    /// into this queue.
    pub fn add_rewind(&self, job: Job) -> QueueResult<()> {
        if self.inner.is_global() {
            return Err(QueueError::Invalid);
        }
        add_item(&self.inner, WorkItem::User(job.into_item()), true, true)
    }

    /// Barrier: pump the main queue until every previously submitted job
    /// has completed and its notifier has run.
    ///
    /// Must be called from the main-queue thread; calling it from inside
    /// a notifier deadlocks, exactly like recursively draining the main
    /// queue would.
    pub fn flush(&self) -> QueueResult<()> {
        flush_inner(&self.inner)
    }

    /// Flush, then terminate the queue's workers and wait for them to
    /// exit. The queue stays usable; the next `add` grows new workers.
    pub fn stop(&self) -> QueueResult<()> {
        stop_inner(&self.inner)
    }

    /// Queue name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Number of queued (not yet running) items, sentinels included
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items currently executing (for buckets: live runners)
    pub fn running(&self) -> usize {
        self.inner.state.lock().unwrap().n_running
    }

    /// Write a diagnostic snapshot of the queue's state
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        dump_queue(&self.inner, w)
    }
}

impl Clone for Queue {
    fn clone(&self) -> Queue {
        if !self.inner.is_global() {
            let prev = self.inner.xref.fetch_add(1, Ordering::Relaxed);
            assert!(prev > 0);
        }
        Queue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.inner.is_global() {
            return;
        }
        if self.inner.xref.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // Last external handle: nothing can submit new work anymore.
        // Quit the workers and free on the main queue; queued items
        // still drain first, in FIFO order ahead of the stop.
        let mut st = self.inner.state.lock().unwrap();
        assert_eq!(
            st.control,
            ControlSlot::Idle,
            "queue '{}': control item in use at teardown",
            self.inner.name
        );
        st.control = ControlSlot::Destroy;

        let stop = WorkItem::Stop(StopAction::Destroy(Arc::clone(&self.inner)));
        if let Err(err) = add_item_locked(&self.inner, &mut st, stop, false, false) {
            // Same accepted leak as a failed teardown submit always was:
            // the queue stays registered and visible in dump_all.
            wq_warn!(
                "queue '{}': failed to schedule teardown: {}",
                self.inner.name,
                err
            );
        }
    }
}

pub(crate) fn dump_queue<W: Write>(q: &Arc<QueueInner>, w: &mut W) -> io::Result<()> {
    let ts = Instant::now();
    let st = q.state.lock().unwrap();

    let kind = match q.kind {
        QueueKind::Bucket => "Bucket",
        _ => "Queue",
    };

    writeln!(w, "{} '{}'<{:p}>", kind, q.name, Arc::as_ptr(q))?;
    writeln!(w, ".xref\t=\t{}", q.xref.load(Ordering::Relaxed))?;
    writeln!(w, ".maxsize\t=\t{}", q.maxsize)?;
    writeln!(w, ".n_items\t=\t{}", st.items.len())?;
    writeln!(w, ".n_running\t=\t{}", st.n_running)?;
    writeln!(w, ".width\t=\t{}", q.width)?;
    if q.kind != QueueKind::Bucket {
        writeln!(w, ".n_threads\t=\t{}", st.n_threads)?;
    }
    writeln!(w, ".control\t=\t{}", st.control.label())?;
    drop(st);

    writeln!(w, "Total spend {}us.\n", ts.elapsed().as_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_slot_labels() {
        assert_eq!(ControlSlot::Idle.label(), "<none>");
        assert_eq!(ControlSlot::Barrier.label(), "<flush>");
        assert_eq!(ControlSlot::Stop.label(), "<stop>");
        assert_eq!(ControlSlot::Destroy.label(), "<free>");
    }

    #[test]
    fn test_shared_handle_is_global() {
        let q = Queue::shared();
        assert!(q.inner.is_global());
        // Clone and drop of a global handle never touches xref
        // accounting or schedules teardown.
        let before = q.inner.xref.load(Ordering::Relaxed);
        let clone = q.clone();
        drop(clone);
        assert_eq!(q.inner.xref.load(Ordering::Relaxed), before);
    }

    #[test]
    fn test_rewind_rejected_on_shared_pool() {
        let q = Queue::shared();
        let r = q.add_rewind(Job::new(|| {}));
        assert_eq!(r, Err(QueueError::Invalid));
    }

    #[test]
    fn test_dump_mentions_name_and_fields() {
        let q = Queue::new("dump-probe", 4);
        let mut out = Vec::new();
        q.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Queue 'dump-probe'"));
        assert!(text.contains(".maxsize\t=\t4"));
        assert!(text.contains(".control\t=\t<none>"));
    }
}
