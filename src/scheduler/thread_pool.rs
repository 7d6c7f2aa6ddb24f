use std::array;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::counters::Counter;
use crate::framework::FrameworkCore;
use crate::scheduler::processor;
use crate::scheduler::yields::YieldPolicy;

/// Interval at which the manager re-examines the pool when nothing wakes it.
const MANAGER_TICK: Duration = Duration::from_millis(10);

/// Per-worker state owned by the pool: lifecycle flags, affinity masks, event
/// counters, and the join handle of the current thread incarnation.
///
/// Contexts are reused when a retired worker is restarted, so counters
/// survive retirement and keep contributing to framework totals.
pub(crate) struct WorkerContext {
    id: u32,
    node_mask: u32,
    processor_mask: u32,
    running: AtomicBool,
    started: AtomicBool,
    counters: [AtomicU32; Counter::COUNT],
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerContext {
    fn new(id: u32, node_mask: u32, processor_mask: u32) -> Self {
        Self {
            id,
            node_mask,
            processor_mask,
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            counters: array::from_fn(|_| AtomicU32::new(0)),
            join: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn bump(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn counter(&self, counter: Counter) -> u32 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn reset_counters(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn take_join_handle(&self) -> Option<JoinHandle<()>> {
        self.join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Worker main loop: pull a ready mailbox, dispatch one message, repeat.
///
/// Scale-down is cooperative: a worker that wakes to an empty queue compares
/// the actual thread count against the target and retires itself if the pool
/// is oversized, so reductions complete as messages (or shutdown wakeups)
/// arrive.
fn worker_entry(core: Arc<FrameworkCore>, ctx: Arc<WorkerContext>) {
    // The masks scope which NUMA nodes and processors this worker may use;
    // applying them is delegated to the platform affinity layer.
    debug!(
        worker = ctx.id,
        node_mask = ctx.node_mask,
        processor_mask = ctx.processor_mask,
        "worker started"
    );
    ctx.started.store(true, Ordering::Release);

    let mut policy = YieldPolicy::new(core.yield_strategy());

    while ctx.running.load(Ordering::Acquire) {
        match core.work_queue().pop() {
            Some(mailbox) => {
                processor::process_mailbox(&core, &ctx, &mailbox);
                policy.reset();
            }
            None => {
                // Retirement is only considered while the queue is empty, so
                // the last dispatcher always drains its requeues before the
                // pool winds down.
                if core.try_retire() {
                    ctx.running.store(false, Ordering::Release);
                    break;
                }
                ctx.bump(Counter::Yields);
                policy.idle(core.work_queue());
            }
        }
    }

    debug!(worker = ctx.id, "worker stopped");
}

/// Spawns a thread for `ctx` and records its join handle. Returns false when
/// the OS refuses the thread.
fn start_worker(core: &Arc<FrameworkCore>, ctx: &Arc<WorkerContext>) -> bool {
    ctx.running.store(true, Ordering::Release);
    ctx.started.store(false, Ordering::Release);

    let worker_core = Arc::clone(core);
    let worker_ctx = Arc::clone(ctx);
    let spawned = thread::Builder::new()
        .name(format!("aviary-worker-{}", ctx.id))
        .spawn(move || worker_entry(worker_core, worker_ctx));

    match spawned {
        Ok(handle) => {
            *ctx.join.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            true
        }
        Err(err) => {
            ctx.running.store(false, Ordering::Release);
            error!(worker = ctx.id, %err, "failed to spawn worker thread");
            false
        }
    }
}

/// Brings the pool up to the target count: restarts retired contexts first,
/// then creates new ones. Runs under the context-list lock.
fn spawn_to_target(core: &Arc<FrameworkCore>) {
    let mut contexts = core
        .thread_contexts()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    for ctx in contexts.iter() {
        if core.num_threads() >= core.target_threads() {
            break;
        }
        if !ctx.is_running() {
            // Collect the previous incarnation before restarting.
            if let Some(handle) = ctx.take_join_handle() {
                if handle.join().is_err() {
                    error!(worker = ctx.id, "worker thread panicked");
                }
            }
            if start_worker(core, ctx) {
                core.note_thread_started();
            }
        }
    }

    while core.num_threads() < core.target_threads() {
        let id = contexts.len() as u32;
        let ctx = Arc::new(WorkerContext::new(
            id,
            core.node_mask(),
            core.processor_mask(),
        ));
        if !start_worker(core, &ctx) {
            break;
        }
        contexts.push(ctx);
        core.note_thread_started();
    }
}

/// Manager thread body.
///
/// The manager spends most of its time asleep on its gate, waking on target
/// raises, on shutdown, or every [`MANAGER_TICK`] as a safety net. It is the
/// only thread that spawns workers; workers retire themselves.
pub(crate) fn manager_loop(core: Arc<FrameworkCore>) {
    while core.is_running() {
        spawn_to_target(&core);
        core.manager_wait(MANAGER_TICK);
    }

    // Shutdown: the target is already zero. Keep waking sleepers until every
    // worker has retired, then collect their threads.
    while core.num_threads() > 0 {
        core.work_queue().wake_all();
        thread::sleep(Duration::from_millis(1));
    }

    for ctx in core.drain_thread_contexts() {
        if let Some(handle) = ctx.take_join_handle() {
            if handle.join().is_err() {
                error!(worker = ctx.id, "worker thread panicked");
            }
        }
    }

    debug!(framework = core.index(), "manager stopped");
}
