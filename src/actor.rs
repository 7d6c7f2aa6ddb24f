use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::address::Address;
use crate::framework::FrameworkCore;
use crate::message::MessageView;

/// A unit of concurrent computation hosted by a [`Framework`](crate::Framework).
///
/// Implementations own their state and declare their message handlers once,
/// at registration time. Handlers for one actor never run concurrently with
/// each other, and messages arrive in the order they were sent to the actor's
/// mailbox. Handlers must not block indefinitely: they occupy a pool worker
/// while they run.
pub trait Actor: Send + Sized + 'static {
    /// Registers this actor type's message handlers.
    fn configure(handlers: &mut Handlers<Self>);
}

type HandlerFn<A> = Box<dyn Fn(&mut A, MessageView<'_>, &mut Context<'_>) + Send + Sync>;
type DefaultFn<A> = Box<dyn Fn(&mut A, Address, &mut Context<'_>) + Send + Sync>;

/// Per-type handler table for an actor type, keyed on message type identity.
pub struct Handlers<A: Actor> {
    entries: HashMap<TypeId, HandlerFn<A>>,
    default: Option<DefaultFn<A>>,
}

impl<A: Actor> Handlers<A> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            default: None,
        }
    }

    /// Registers a handler for messages of type `M`. A later registration for
    /// the same message type replaces the earlier one.
    pub fn on<M: Send + 'static>(
        &mut self,
        handler: impl Fn(&mut A, &M, Address, &mut Context<'_>) + Send + Sync + 'static,
    ) {
        self.entries.insert(
            TypeId::of::<M>(),
            Box::new(move |state: &mut A, view: MessageView<'_>, ctx: &mut Context<'_>| {
                if let Some(payload) = view.payload::<M>() {
                    handler(state, payload, view.sender().clone(), ctx);
                }
            }),
        );
    }

    /// Registers a handler run for messages with no matching typed handler.
    /// Without one, such messages go to the framework's fallback handler.
    pub fn default_handler(
        &mut self,
        handler: impl Fn(&mut A, Address, &mut Context<'_>) + Send + Sync + 'static,
    ) {
        self.default = Some(Box::new(handler));
    }
}

/// Dispatch context handed to message handlers.
pub struct Context<'a> {
    core: &'a FrameworkCore,
    own: &'a Address,
}

impl Context<'_> {
    /// Address of the actor whose handler is running.
    pub fn address(&self) -> Address {
        self.own.clone()
    }

    /// Sends `value` to `to`, with this actor as the sender. Non-blocking;
    /// returns false only when message memory cannot be allocated or a
    /// remote endpoint rejects the message.
    pub fn send<M: Send + 'static>(&self, value: M, to: Address) -> bool {
        self.core.send_from(value, self.own.clone(), to)
    }
}

/// Capability consumed by the dispatcher: deliver one message to one actor.
pub(crate) trait AnyActor: Send + Sync {
    fn process(&self, core: &FrameworkCore, message: MessageView<'_>);
}

/// Adapter binding an actor's state and handler table to a mailbox.
pub(crate) struct Cell<A: Actor> {
    address: Address,
    handlers: Handlers<A>,
    state: Mutex<A>,
}

impl<A: Actor> Cell<A> {
    pub(crate) fn new(address: Address, state: A) -> Self {
        let mut handlers = Handlers::new();
        A::configure(&mut handlers);
        Self {
            address,
            handlers,
            state: Mutex::new(state),
        }
    }
}

impl<A: Actor> AnyActor for Cell<A> {
    fn process(&self, core: &FrameworkCore, message: MessageView<'_>) {
        let mut ctx = Context {
            core,
            own: &self.address,
        };

        // Uncontended: at most one worker dispatches to a mailbox at a time.
        // into_inner keeps the actor usable after a handler panic.
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(handler) = self.handlers.entries.get(&message.type_id()) {
            handler(&mut state, message, &mut ctx);
        } else if let Some(default) = &self.handlers.default {
            default(&mut state, message.sender().clone(), &mut ctx);
        } else {
            drop(state);
            core.fallback_handlers().handle(&message);
        }
    }
}

/// Owning handle for a registered actor.
///
/// Dropping the handle deregisters the actor from its framework, waiting
/// until no handler of the actor is still running. The handle must be
/// dropped before the framework is.
pub struct ActorHandle {
    core: Arc<FrameworkCore>,
    address: Address,
}

impl ActorHandle {
    pub(crate) fn new(core: Arc<FrameworkCore>, address: Address) -> Self {
        Self { core, address }
    }

    /// Address of the actor's mailbox.
    pub fn address(&self) -> Address {
        self.address.clone()
    }

    /// Number of messages queued at the actor awaiting processing, including
    /// the message currently being dispatched, if any.
    pub fn queued_messages(&self) -> u32 {
        self.core.queued_messages(self.address.index())
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        self.core.deregister_actor(self.address.index());
    }
}
