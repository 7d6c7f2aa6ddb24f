use std::time::Duration;

use crate::actor::{Actor, ActorHandle, Handlers};
use crate::address::Address;
use crate::error::RegistrationError;
use crate::framework::Framework;

/// A registered receiving endpoint for non-actor code.
///
/// A receiver owns a mailbox like any actor, so it has an [`Address`] that
/// actors can reply to. Messages of type `M` sent to that address are
/// forwarded to an internal channel that external threads wait on. The usual
/// pattern is to pass `receiver.address()` as the `from` address of a
/// [`Framework::send`] and block on [`wait`](Receiver::wait) for the reply.
pub struct Receiver<M: Clone + Send + 'static> {
    handle: ActorHandle,
    messages: flume::Receiver<(M, Address)>,
}

/// Internal actor that forwards every received `M` into the channel.
struct Catcher<M: Clone + Send + 'static> {
    tx: flume::Sender<(M, Address)>,
}

impl<M: Clone + Send + 'static> Actor for Catcher<M> {
    fn configure(handlers: &mut Handlers<Self>) {
        handlers.on::<M>(|catcher, message, from, _ctx| {
            let _ = catcher.tx.send((message.clone(), from));
        });
    }
}

impl<M: Clone + Send + 'static> Receiver<M> {
    /// Registers a new receiver in `framework`.
    pub fn new(framework: &Framework) -> Result<Self, RegistrationError> {
        Self::build(framework, None)
    }

    /// Registers a new receiver under a unique name, making it addressable by
    /// name.
    pub fn named(framework: &Framework, name: &str) -> Result<Self, RegistrationError> {
        Self::build(framework, Some(name))
    }

    fn build(framework: &Framework, name: Option<&str>) -> Result<Self, RegistrationError> {
        let (tx, messages) = flume::unbounded();
        let handle = framework.register(Catcher { tx }, name)?;
        Ok(Self { handle, messages })
    }

    /// The address messages should be sent to.
    pub fn address(&self) -> Address {
        self.handle.address()
    }

    /// Blocks until a message arrives and returns it with its sender.
    pub fn wait(&self) -> (M, Address) {
        // The sending half lives in our own registered catcher, so the
        // channel cannot disconnect while the receiver exists.
        self.messages
            .recv()
            .expect("receiver channel disconnected")
    }

    /// Blocks for up to `timeout`; `None` if nothing arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<(M, Address)> {
        self.messages.recv_timeout(timeout).ok()
    }

    /// Returns a message if one has already arrived.
    pub fn try_wait(&self) -> Option<(M, Address)> {
        self.messages.try_recv().ok()
    }

    /// Number of messages received and not yet consumed.
    pub fn count(&self) -> usize {
        self.messages.len()
    }
}
