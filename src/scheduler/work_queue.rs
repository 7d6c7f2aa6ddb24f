use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::mailbox::MailboxRef;

/// Shared FIFO of ready mailboxes consumed by the worker threads.
///
/// The queue itself sits behind a single spinlock; a separate mutex/condvar
/// pair forms the idle gate that lets politely-yielding workers sleep while
/// the queue is empty. Scheduling enqueues a mailbox only when its message
/// queue goes from empty to non-empty, or when a dispatch leaves messages
/// behind, so a mailbox appears here at most once at any instant.
pub(crate) struct WorkQueue {
    queue: spin::Mutex<VecDeque<MailboxRef>>,
    idle_gate: Mutex<()>,
    idle_cv: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: spin::Mutex::new(VecDeque::new()),
            idle_gate: Mutex::new(()),
            idle_cv: Condvar::new(),
        }
    }

    /// Appends a ready mailbox and wakes one sleeping worker.
    pub(crate) fn push(&self, mailbox: MailboxRef) {
        self.queue.lock().push_back(mailbox);
        self.idle_cv.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<MailboxRef> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Blocks the caller until a push notifies or `timeout` elapses. Returns
    /// immediately if the queue is non-empty. A notification raced against
    /// entry to the wait costs at most one timeout tick; callers re-check the
    /// queue on return.
    pub(crate) fn sleep(&self, timeout: Duration) {
        let gate = self
            .idle_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.is_empty() {
            return;
        }
        let _ = self.idle_cv.wait_timeout(gate, timeout);
    }

    /// Wakes every sleeping worker. Used on shutdown and when the thread
    /// target drops, so excess workers notice and retire.
    pub(crate) fn wake_all(&self) {
        self.idle_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use crossbeam_utils::CachePadded;
    use std::sync::Arc;

    fn mailbox(index: u32) -> MailboxRef {
        Arc::new(CachePadded::new(Mailbox::new(index)))
    }

    #[test]
    fn pops_in_push_order() {
        let queue = WorkQueue::new();
        queue.push(mailbox(1));
        queue.push(mailbox(2));
        queue.push(mailbox(3));

        assert_eq!(queue.pop().unwrap().index(), 1);
        assert_eq!(queue.pop().unwrap().index(), 2);
        assert_eq!(queue.pop().unwrap().index(), 3);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn sleep_returns_immediately_when_work_is_queued() {
        let queue = WorkQueue::new();
        queue.push(mailbox(1));

        let start = std::time::Instant::now();
        queue.sleep(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_times_out_on_an_empty_queue() {
        let queue = WorkQueue::new();
        let start = std::time::Instant::now();
        queue.sleep(Duration::from_millis(10));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
