use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::actor::{Actor, ActorHandle, AnyActor, Cell};
use crate::address::Address;
use crate::allocator::CachingAllocator;
use crate::counters::Counter;
use crate::directory::Directory;
use crate::endpoint::{Endpoint, WireMessage};
use crate::error::{RegistrationError, SystemError};
use crate::fallback::{FallbackHandler, FallbackHandlerSet};
use crate::mailbox::MailboxRef;
use crate::message::Message;
use crate::registry;
use crate::scheduler::thread_pool::{self, WorkerContext};
use crate::scheduler::work_queue::WorkQueue;
use crate::scheduler::yields::{self, YieldStrategy};

/// Construction parameters for a framework's worker pool.
///
/// The masks restrict which NUMA nodes, and which processors within each
/// enabled node, the worker threads may execute on.
#[derive(Clone, Debug)]
pub struct Parameters {
    /// Initial target number of worker threads. Must be non-zero.
    pub thread_count: u32,
    /// Bitfield of NUMA nodes the workers may run on.
    pub node_mask: u32,
    /// Per-node processor affinity mask.
    pub processor_mask: u32,
    /// Idle behaviour of the worker threads.
    pub yield_strategy: YieldStrategy,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            thread_count: 16,
            node_mask: 0x1,
            processor_mask: 0xFFFF_FFFF,
            yield_strategy: YieldStrategy::Polite,
        }
    }
}

impl Parameters {
    /// Parameters with the given initial thread count and defaults otherwise.
    pub fn with_threads(thread_count: u32) -> Self {
        Self {
            thread_count,
            ..Self::default()
        }
    }

    /// Parameters sized to the number of logical CPUs on this host.
    pub fn per_cpu() -> Self {
        Self::with_threads(num_cpus::get().max(1) as u32)
    }
}

/// Shared state of a framework, referenced by the manager, the workers, actor
/// handles, and the process-wide registry.
pub(crate) struct FrameworkCore {
    /// Non-zero index unique within the process; set once at construction.
    index: AtomicU32,
    name: OnceLock<Arc<str>>,
    params: Parameters,
    endpoint: Option<Arc<dyn Endpoint>>,
    directory: Directory,
    work_queue: WorkQueue,
    fallback_handlers: FallbackHandlerSet,
    message_allocator: CachingAllocator,
    running: AtomicBool,
    target_thread_count: AtomicU32,
    thread_count: AtomicU32,
    peak_thread_count: AtomicU32,
    thread_contexts: Mutex<Vec<Arc<WorkerContext>>>,
    manager_gate: Mutex<bool>,
    manager_cv: Condvar,
}

impl FrameworkCore {
    fn new(endpoint: Option<Arc<dyn Endpoint>>, params: Parameters) -> Self {
        let target = params.thread_count;
        Self {
            index: AtomicU32::new(0),
            name: OnceLock::new(),
            params,
            endpoint,
            directory: Directory::new(),
            work_queue: WorkQueue::new(),
            fallback_handlers: FallbackHandlerSet::new(),
            message_allocator: CachingAllocator::new(),
            running: AtomicBool::new(true),
            target_thread_count: AtomicU32::new(target),
            thread_count: AtomicU32::new(0),
            peak_thread_count: AtomicU32::new(0),
            thread_contexts: Mutex::new(Vec::new()),
            manager_gate: Mutex::new(false),
            manager_cv: Condvar::new(),
        }
    }

    pub(crate) fn index(&self) -> u32 {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn work_queue(&self) -> &WorkQueue {
        &self.work_queue
    }

    pub(crate) fn fallback_handlers(&self) -> &FallbackHandlerSet {
        &self.fallback_handlers
    }

    pub(crate) fn message_allocator(&self) -> &CachingAllocator {
        &self.message_allocator
    }

    pub(crate) fn yield_strategy(&self) -> YieldStrategy {
        self.params.yield_strategy
    }

    pub(crate) fn node_mask(&self) -> u32 {
        self.params.node_mask
    }

    pub(crate) fn processor_mask(&self) -> u32 {
        self.params.processor_mask
    }

    pub(crate) fn target_threads(&self) -> u32 {
        self.target_thread_count.load(Ordering::Acquire)
    }

    pub(crate) fn num_threads(&self) -> u32 {
        self.thread_count.load(Ordering::Acquire)
    }

    /// Records a newly started worker and tracks the peak count.
    pub(crate) fn note_thread_started(&self) {
        let count = self.thread_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_thread_count.fetch_max(count, Ordering::AcqRel);
    }

    /// Claims one unit of scale-down. A woken worker calls this and exits on
    /// success, which is how the pool shrinks towards the target.
    pub(crate) fn try_retire(&self) -> bool {
        loop {
            let current = self.thread_count.load(Ordering::Acquire);
            let target = self.target_thread_count.load(Ordering::Acquire);
            if current <= target {
                return false;
            }
            if self
                .thread_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub(crate) fn thread_contexts(&self) -> &Mutex<Vec<Arc<WorkerContext>>> {
        &self.thread_contexts
    }

    pub(crate) fn drain_thread_contexts(&self) -> Vec<Arc<WorkerContext>> {
        let mut contexts = self
            .thread_contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *contexts)
    }

    /// Parks the manager until woken or until `timeout` elapses.
    pub(crate) fn manager_wait(&self, timeout: Duration) {
        let mut woken = self
            .manager_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*woken {
            let (guard, _) = self
                .manager_cv
                .wait_timeout(woken, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            woken = guard;
        }
        *woken = false;
    }

    fn manager_wake(&self) {
        *self
            .manager_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.manager_cv.notify_all();
    }

    /// Packages `value` and routes it. The send path never blocks; false
    /// means the message could not be allocated or a remote endpoint refused
    /// it.
    pub(crate) fn send_from<M: Send + 'static>(
        &self,
        value: M,
        from: Address,
        to: Address,
    ) -> bool {
        let Some(message) = Message::pack(&self.message_allocator, value, from) else {
            return false;
        };
        self.route(message, to)
    }

    /// Resolves `to` as local, foreign (another framework in this process) or
    /// remote, and delivers accordingly.
    pub(crate) fn route(&self, message: Message, to: Address) -> bool {
        // Index 0 means the target is addressed only by name and may be
        // remote. Names are globally unique, so a local match short-circuits
        // the network.
        if to.index() == 0 {
            let Some(name) = to.name() else {
                return self.undeliverable(message, true);
            };
            if let Some(mailbox) = self.directory.lookup_by_name(name) {
                return self.deliver_local(message, mailbox);
            }
            return match &self.endpoint {
                Some(endpoint) => {
                    let accepted = {
                        let view = message.view();
                        endpoint.send(
                            WireMessage {
                                data: view.bytes(),
                                from: view.sender().clone(),
                            },
                            &to,
                        )
                    };
                    if accepted {
                        message.release(&self.message_allocator);
                        true
                    } else {
                        self.undeliverable(message, false)
                    }
                }
                None => self.undeliverable(message, false),
            };
        }

        if to.framework() == self.index() {
            return match self.directory.lookup(to.index()) {
                Some(mailbox) => self.deliver_local(message, mailbox),
                None => self.undeliverable(message, true),
            };
        }

        // Foreign framework within this process: route against its directory
        // and work queue. The message will be released against the consuming
        // framework's allocator.
        match registry::lookup(to.framework()) {
            Some(foreign) => foreign.route(message, to),
            None => self.undeliverable(message, true),
        }
    }

    /// Pushes the message into a local mailbox, scheduling the mailbox on the
    /// empty to non-empty transition. An unbound mailbox with no pending
    /// predecessors short-circuits to the fallback handler; with predecessors
    /// queued, the message lines up behind them and the dispatcher reports
    /// each in turn.
    fn deliver_local(&self, message: Message, mailbox: MailboxRef) -> bool {
        {
            let mut mb = mailbox.lock();
            if !mb.is_bound() && mb.is_empty() {
                drop(mb);
                return self.undeliverable(message, true);
            }

            let schedule = mb.is_empty();
            mb.push(message);
            if schedule {
                self.work_queue.push(mailbox.clone());
            }
        }
        true
    }

    /// Reports the message to the fallback handler and destroys it. Returns
    /// `result`, the send-path outcome for this failure class.
    fn undeliverable(&self, message: Message, result: bool) -> bool {
        {
            let view = message.view();
            self.fallback_handlers.handle(&view);
        }
        message.release(&self.message_allocator);
        result
    }

    fn register_in<A: Actor>(
        core: &Arc<Self>,
        actor: A,
        name: Option<&str>,
    ) -> Result<ActorHandle, RegistrationError> {
        let name: Option<Arc<str>> = name.map(Into::into);
        let framework_index = core.index();

        let cell_name = name.clone();
        let (index, _mailbox) = core.directory.register(name.clone(), move |mailbox_index| {
            let address = Address::with_name(framework_index, mailbox_index, cell_name);
            Arc::new(Cell::new(address, actor)) as Arc<dyn AnyActor>
        })?;

        let address = Address::with_name(framework_index, index, name);
        debug!(framework = framework_index, %address, "actor registered");
        Ok(ActorHandle::new(Arc::clone(core), address))
    }

    /// Clears the actor binding, waiting until no handler is still running.
    pub(crate) fn deregister_actor(&self, index: u32) {
        self.directory.deregister(index);
        debug!(framework = self.index(), mailbox = index, "actor deregistered");
    }

    pub(crate) fn queued_messages(&self, index: u32) -> u32 {
        self.directory
            .lookup(index)
            .map(|mailbox| mailbox.lock().len())
            .unwrap_or(0)
    }
}

/// A process-local actor runtime instance: mailbox directory, scheduler,
/// worker pool and message allocator.
///
/// Frameworks host actors; each actor registered in a framework is executed
/// exclusively by that framework's worker threads. Multiple frameworks may
/// coexist in one process, each with an independently managed pool, and
/// actors in one may send to actors in another.
///
/// A framework must outlive the actors registered within it: drop every
/// [`ActorHandle`] before dropping the framework.
pub struct Framework {
    core: Arc<FrameworkCore>,
    manager: Option<JoinHandle<()>>,
}

impl Framework {
    /// Creates a framework with default parameters.
    pub fn new() -> Result<Self, SystemError> {
        Self::with_parameters(Parameters::default())
    }

    /// Creates a framework with the given parameters.
    pub fn with_parameters(params: Parameters) -> Result<Self, SystemError> {
        Self::build(None, None, params)
    }

    /// Creates a framework tied to a network endpoint, able to exchange
    /// messages with frameworks on other hosts. The optional name scopes the
    /// framework's diagnostics and must be unique per endpoint.
    pub fn with_endpoint(
        endpoint: Arc<dyn Endpoint>,
        name: Option<&str>,
        params: Parameters,
    ) -> Result<Self, SystemError> {
        Self::build(Some(endpoint), name, params)
    }

    fn build(
        endpoint: Option<Arc<dyn Endpoint>>,
        name: Option<&str>,
        params: Parameters,
    ) -> Result<Self, SystemError> {
        if params.thread_count == 0 {
            return Err(SystemError::Config(
                "thread_count must be non-zero".to_string(),
            ));
        }

        let core = Arc::new(FrameworkCore::new(endpoint, params));

        let manager_core = Arc::clone(&core);
        let manager = thread::Builder::new()
            .name("aviary-manager".to_string())
            .spawn(move || thread_pool::manager_loop(manager_core))
            .map_err(|err| SystemError::ThreadSetup(err.to_string()))?;

        // Wait for the manager to bring up the initial workers before
        // accepting work.
        let mut spin = 0u32;
        while core.num_threads() < core.target_threads() {
            yields::backoff(&mut spin);
        }

        let index = registry::register(&core);
        core.index.store(index, Ordering::Release);

        let name: Arc<str> = match name {
            Some(name) => name.into(),
            None => format!("framework.{index}").into(),
        };
        let _ = core.name.set(name);

        debug!(framework = index, "framework started");
        Ok(Self {
            core,
            manager: Some(manager),
        })
    }

    /// Non-zero index of this framework, unique within the process while the
    /// framework is alive.
    pub fn index(&self) -> u32 {
        self.core.index()
    }

    /// Name of this framework.
    pub fn name(&self) -> &str {
        self.core.name.get().map(|name| &**name).unwrap_or("")
    }

    /// Registers `actor` and returns its owning handle. With a name, the
    /// actor's mailbox becomes addressable by name, and the slot persists
    /// across actor lifetimes so a successor can be registered under the same
    /// name later.
    pub fn register<A: Actor>(
        &self,
        actor: A,
        name: Option<&str>,
    ) -> Result<ActorHandle, RegistrationError> {
        FrameworkCore::register_in(&self.core, actor, name)
    }

    /// Sends `value` from `from` to `to`.
    ///
    /// Sending never blocks. The return value is false only when message
    /// memory cannot be allocated or a remote endpoint refuses the message;
    /// an unknown recipient still returns true after the fallback handler has
    /// been informed. A true return therefore means the message was handed
    /// over, not that the recipient acted on it.
    pub fn send<M: Send + 'static>(&self, value: M, from: Address, to: Address) -> bool {
        self.core.send_from(value, from, to)
    }

    /// Delivers a message arriving from the network into this framework.
    /// Called by endpoint implementations once they have decoded the wire
    /// format.
    pub fn deliver<M: Send + 'static>(&self, value: M, from: Address, to: Address) -> bool {
        self.core.send_from(value, from, to)
    }

    /// Raises the target worker count to at least `count`. The manager spawns
    /// the missing workers asynchronously.
    pub fn set_min_threads(&self, count: u32) {
        debug_assert!(count > 0, "thread counts must be non-zero");
        self.core
            .target_thread_count
            .fetch_max(count, Ordering::AcqRel);
        self.core.manager_wake();
    }

    /// Lowers the target worker count to at most `count`. Excess workers
    /// retire as they wake, so the drop completes within a bounded number of
    /// message arrivals.
    pub fn set_max_threads(&self, count: u32) {
        debug_assert!(count > 0, "thread counts must be non-zero");
        self.core
            .target_thread_count
            .fetch_min(count, Ordering::AcqRel);
        self.core.work_queue.wake_all();
    }

    /// Current minimum limit on the worker count. Reports the current target,
    /// which both limits negotiate over.
    pub fn min_threads(&self) -> u32 {
        self.core.target_threads()
    }

    /// Current maximum limit on the worker count. Reports the current target,
    /// which both limits negotiate over.
    pub fn max_threads(&self) -> u32 {
        self.core.target_threads()
    }

    /// Actual number of enabled worker threads, including any currently
    /// sleeping for lack of work.
    pub fn num_threads(&self) -> u32 {
        self.core.num_threads()
    }

    /// Highest number of simultaneously enabled workers seen since
    /// construction.
    pub fn peak_threads(&self) -> u32 {
        self.core.peak_thread_count.load(Ordering::Acquire)
    }

    /// Installs the fallback handler run for undeliverable or unhandled
    /// messages, replacing any previously installed handler of either shape.
    pub fn set_fallback_handler(&self, handler: FallbackHandler) {
        self.core.fallback_handlers.set(handler);
    }

    /// Zeroes every per-thread event counter.
    pub fn reset_counters(&self) {
        let contexts = self
            .core
            .thread_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for ctx in contexts.iter() {
            ctx.reset_counters();
        }
    }

    /// Current value of `counter`, summed over all worker threads that have
    /// existed in this framework.
    pub fn counter_value(&self, counter: Counter) -> u32 {
        let contexts = self
            .core
            .thread_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        contexts
            .iter()
            .fold(0u32, |total, ctx| total.wrapping_add(ctx.counter(counter)))
    }

    /// Snapshots the per-thread values of `counter` for the currently running
    /// workers into `out`, returning how many values were written.
    pub fn per_thread_counter_values(&self, counter: Counter, out: &mut [u32]) -> usize {
        let contexts = self
            .core
            .thread_contexts()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut written = 0;
        for ctx in contexts.iter() {
            if written == out.len() {
                break;
            }
            if ctx.is_running() {
                out[written] = ctx.counter(counter);
                written += 1;
            }
        }
        written
    }
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework")
            .field("index", &self.index())
            .field("name", &self.name())
            .field("num_threads", &self.num_threads())
            .field("target_threads", &self.core.target_threads())
            .finish()
    }
}

impl Drop for Framework {
    /// Tears the framework down: stops accepting foreign traffic, drains the
    /// ready queue, retires the workers, stops the manager, and flushes the
    /// allocator caches.
    ///
    /// All actors must already be deregistered; destroying a framework with
    /// live actors or pending messages is a usage error reported by debug
    /// assertions.
    fn drop(&mut self) {
        let core = &self.core;

        // Leave the process registry first so no foreign sender can route
        // into a framework that is draining.
        registry::deregister(core.index());

        // Let scheduled work drain.
        let mut spin = 0u32;
        while !core.work_queue.is_empty() {
            yields::backoff(&mut spin);
        }

        // Retire the entire pool, then stop the manager once every worker is
        // gone.
        core.target_thread_count.store(0, Ordering::Release);
        let mut spin = 0u32;
        while core.num_threads() > 0 {
            core.work_queue.wake_all();
            yields::backoff(&mut spin);
        }

        core.running.store(false, Ordering::Release);
        core.manager_wake();
        if let Some(manager) = self.manager.take() {
            if manager.join().is_err() {
                warn!(framework = core.index(), "manager thread panicked");
            }
        }

        debug_assert!(
            core.work_queue.is_empty(),
            "framework destroyed with scheduled mailboxes"
        );
        debug_assert_eq!(
            core.directory.bound_actors(),
            0,
            "framework destroyed before its actors were deregistered"
        );

        debug!(framework = core.index(), "framework stopped");
        // Dropping the core flushes the allocator caches.
    }
}
