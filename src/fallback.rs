use std::sync::{PoisonError, RwLock};

use tracing::error;

use crate::address::Address;
use crate::message::MessageView;

/// The handler invoked for undeliverable or unhandled messages: when a send
/// finds no recipient, when a dispatched mailbox has no bound actor, or when
/// the recipient has no handler for the message type.
///
/// At most one handler is installed at a time; installing either shape
/// replaces the previously installed handler of either shape.
pub enum FallbackHandler {
    /// Receives only the sender address.
    Typed(Box<dyn Fn(Address) + Send + Sync>),
    /// Receives the raw message bytes and the sender address.
    Blind(Box<dyn Fn(&[u8], Address) + Send + Sync>),
}

impl FallbackHandler {
    /// The handler installed by default: reports the unhandled message,
    /// asserting in debug builds. In release builds it logs and moves on.
    pub(crate) fn default_handler() -> Self {
        FallbackHandler::Typed(Box::new(|from| {
            error!(%from, "message was not delivered or handled");
            debug_assert!(
                false,
                "unhandled message sent from {from}; install a fallback handler to observe these"
            );
        }))
    }
}

pub(crate) struct FallbackHandlerSet {
    handler: RwLock<FallbackHandler>,
}

impl FallbackHandlerSet {
    pub(crate) fn new() -> Self {
        Self {
            handler: RwLock::new(FallbackHandler::default_handler()),
        }
    }

    pub(crate) fn set(&self, handler: FallbackHandler) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Runs the installed handler against the message. Handlers are user code
    /// and may run for arbitrary time, hence the blocking read lock rather
    /// than a spinlock.
    pub(crate) fn handle(&self, message: &MessageView<'_>) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match &*handler {
            FallbackHandler::Typed(run) => run(message.sender().clone()),
            FallbackHandler::Blind(run) => run(message.bytes(), message.sender().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CachingAllocator;
    use crate::message::Message;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn installing_a_handler_replaces_the_previous_one() {
        let allocator = CachingAllocator::new();
        let set = FallbackHandlerSet::new();

        let typed_calls = Arc::new(AtomicU32::new(0));
        let blind_calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&typed_calls);
        set.set(FallbackHandler::Typed(Box::new(move |_from| {
            counter.fetch_add(1, Ordering::Relaxed);
        })));

        let message = Message::pack(&allocator, 5u32, Address::new(1, 2)).unwrap();
        set.handle(&message.view());
        assert_eq!(typed_calls.load(Ordering::Relaxed), 1);

        let counter = Arc::clone(&blind_calls);
        set.set(FallbackHandler::Blind(Box::new(move |bytes, _from| {
            assert_eq!(bytes.len(), 4);
            counter.fetch_add(1, Ordering::Relaxed);
        })));

        set.handle(&message.view());
        assert_eq!(typed_calls.load(Ordering::Relaxed), 1);
        assert_eq!(blind_calls.load(Ordering::Relaxed), 1);

        message.release(&allocator);
    }

    #[test]
    fn blind_handlers_see_sender_and_payload() {
        let allocator = CachingAllocator::new();
        let set = FallbackHandlerSet::new();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        set.set(FallbackHandler::Blind(Box::new(move |bytes, from| {
            *sink.lock().unwrap() = Some((bytes.to_vec(), from));
        })));

        let message = Message::pack(&allocator, 0x0102_0304u32, Address::new(3, 9)).unwrap();
        set.handle(&message.view());
        message.release(&allocator);

        let (bytes, from) = seen.lock().unwrap().take().unwrap();
        assert_eq!(bytes, 0x0102_0304u32.to_ne_bytes());
        assert_eq!(from, Address::new(3, 9));
    }
}
