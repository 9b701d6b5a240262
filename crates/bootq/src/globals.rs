//! Process-global queue state
//!
//! Two queues live for the whole process: the shared concurrent pool and
//! the main queue. Alongside them sit the registries of live private
//! queues and buckets, which exist so diagnostics can walk everything and
//! teardown can unregister.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};

use crate::queue::{dump_queue, QueueInner, QueueKind, DEFAULT_MAXSIZE, DEFAULT_POOL_WIDTH};

pub(crate) struct Globals {
    pub(crate) shared: Arc<QueueInner>,
    pub(crate) main: Arc<QueueInner>,
    pub(crate) queues: Mutex<Vec<Arc<QueueInner>>>,
    pub(crate) buckets: Mutex<Vec<Arc<QueueInner>>>,
}

static GLOBALS: OnceLock<Globals> = OnceLock::new();

/// Lazily initialized exactly once
pub(crate) fn globals() -> &'static Globals {
    GLOBALS.get_or_init(|| Globals {
        shared: Arc::new(QueueInner::new(
            "shared-pool",
            QueueKind::Shared,
            DEFAULT_MAXSIZE,
            DEFAULT_POOL_WIDTH,
        )),
        main: Arc::new(QueueInner::new(
            "main-queue",
            QueueKind::Main,
            DEFAULT_MAXSIZE,
            1,
        )),
        queues: Mutex::new(Vec::new()),
        buckets: Mutex::new(Vec::new()),
    })
}

/// Write a diagnostic snapshot of every live queue
pub fn dump_all<W: Write>(w: &mut W) -> io::Result<()> {
    let g = globals();

    writeln!(w, "### Dump global queues:")?;
    dump_queue(&g.shared, w)?;
    dump_queue(&g.main, w)?;

    writeln!(w, "### Dump private queues:")?;
    for q in g.queues.lock().unwrap().iter() {
        dump_queue(q, w)?;
    }

    writeln!(w, "### Dump buckets:")?;
    for b in g.buckets.lock().unwrap().iter() {
        dump_queue(b, w)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals_singleton() {
        let a = globals() as *const Globals;
        let b = globals() as *const Globals;
        assert_eq!(a, b);
        assert_eq!(globals().shared.name(), "shared-pool");
        assert_eq!(globals().main.name(), "main-queue");
    }

    #[test]
    fn test_dump_all_writes_sections() {
        let mut out = Vec::new();
        dump_all(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("### Dump global queues:"));
        assert!(text.contains("Queue 'shared-pool'"));
        assert!(text.contains("Queue 'main-queue'"));
    }
}
