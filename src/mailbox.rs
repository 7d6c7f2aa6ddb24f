use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use spin::{Mutex, MutexGuard};

use crate::actor::AnyActor;
use crate::message::{Header, Message};

/// Shared handle to a mailbox. Mailboxes are padded to a cache line so
/// adjacent slots never share one.
pub(crate) type MailboxRef = Arc<CachePadded<Mailbox>>;

/// A per-actor FIFO of pending messages, used as the unit of dispatch.
///
/// All state sits behind one spinlock. Scheduling maintains two invariants:
/// a mailbox appears on the work queue at most once at any instant, and only
/// if it was non-empty at the moment it was enqueued. The worker that pops it
/// from the work queue owns it until it is re-enqueued.
pub(crate) struct Mailbox {
    index: u32,
    inner: Mutex<MailboxInner>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").field("index", &self.index).finish()
    }
}

pub(crate) struct MailboxInner {
    name: Option<Arc<str>>,
    queue: VecDeque<Message>,
    actor: Option<Arc<dyn AnyActor>>,
    pin_count: u32,
}

impl Mailbox {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            inner: Mutex::new(MailboxInner {
                name: None,
                queue: VecDeque::new(),
                actor: None,
                pin_count: 0,
            }),
        }
    }

    /// Index of this mailbox within its framework's directory.
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    /// Acquires the mailbox spinlock. Critical sections are kept short; the
    /// only lock ever taken while holding a mailbox lock is the work queue's.
    pub(crate) fn lock(&self) -> MutexGuard<'_, MailboxInner> {
        self.inner.lock()
    }
}

impl MailboxInner {
    pub(crate) fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    /// Peeks at the head message without removing it.
    ///
    /// The returned pointer stays valid across an unlock: pushes only append,
    /// and only the worker that owns the mailbox may pop.
    pub(crate) fn front(&self) -> Option<NonNull<Header>> {
        self.queue.front().map(Message::raw)
    }

    pub(crate) fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued messages, including one currently being dispatched.
    pub(crate) fn len(&self) -> u32 {
        self.queue.len() as u32
    }

    pub(crate) fn name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    /// Names the mailbox. Permitted only while unpinned.
    pub(crate) fn set_name(&mut self, name: Option<Arc<str>>) {
        debug_assert_eq!(self.pin_count, 0);
        self.name = name;
    }

    /// Binds an actor to the mailbox. Permitted only while unpinned and
    /// unbound.
    pub(crate) fn bind_actor(&mut self, actor: Arc<dyn AnyActor>) {
        debug_assert_eq!(self.pin_count, 0);
        debug_assert!(self.actor.is_none());
        self.actor = Some(actor);
    }

    /// Clears the actor binding. Permitted only while unpinned and bound.
    pub(crate) fn unbind_actor(&mut self) {
        debug_assert_eq!(self.pin_count, 0);
        debug_assert!(self.actor.is_some());
        self.actor = None;
    }

    pub(crate) fn actor(&self) -> Option<Arc<dyn AnyActor>> {
        self.actor.clone()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.actor.is_some()
    }

    /// Prevents the actor binding from changing while the lock is not held.
    /// Workers pin around dispatch because handlers run for arbitrary time
    /// and must not run under the mailbox lock.
    pub(crate) fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub(crate) fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0);
        self.pin_count -= 1;
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::allocator::CachingAllocator;

    fn pack(allocator: &CachingAllocator, value: u32) -> Message {
        Message::pack(allocator, value, Address::null()).unwrap()
    }

    #[test]
    fn messages_pop_in_push_order() {
        let allocator = CachingAllocator::new();
        let mailbox = Mailbox::new(1);

        {
            let mut mb = mailbox.lock();
            for value in 0..4u32 {
                mb.push(pack(&allocator, value));
            }
            assert_eq!(mb.len(), 4);
        }

        let mut mb = mailbox.lock();
        for expected in 0..4u32 {
            let message = mb.pop().unwrap();
            assert_eq!(message.view().payload::<u32>(), Some(&expected));
            message.release(&allocator);
        }
        assert!(mb.is_empty());
    }

    #[test]
    fn front_matches_the_next_pop() {
        let allocator = CachingAllocator::new();
        let mailbox = Mailbox::new(1);

        let mut mb = mailbox.lock();
        assert!(mb.front().is_none());

        mb.push(pack(&allocator, 9));
        let peeked = mb.front().unwrap();
        let popped = mb.pop().unwrap();
        assert_eq!(peeked, popped.raw());
        popped.release(&allocator);
    }

    #[test]
    fn pin_counts_nest() {
        let mailbox = Mailbox::new(1);
        let mut mb = mailbox.lock();

        assert!(!mb.is_pinned());
        mb.pin();
        mb.pin();
        assert!(mb.is_pinned());
        mb.unpin();
        assert!(mb.is_pinned());
        mb.unpin();
        assert!(!mb.is_pinned());
    }
}
