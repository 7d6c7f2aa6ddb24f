use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::counters::Counter;
use crate::framework::FrameworkCore;
use crate::mailbox::MailboxRef;
use crate::message::MessageView;
use crate::scheduler::thread_pool::WorkerContext;

/// Dispatches one message from a ready mailbox.
///
/// The head message is peeked before dispatch and popped only afterwards, so
/// the mailbox stays non-empty while its message is in flight. A concurrent
/// sender therefore never observes an empty to non-empty transition mid-dispatch
/// and never re-enqueues the mailbox: exactly one worker dispatches per
/// mailbox at a time.
///
/// The actor binding is read under the lock and pinned, then the handler runs
/// with the lock released; handlers are user code and may run for arbitrary
/// time. A panicking handler is contained: the pin is released, the message
/// is popped and destroyed, and the mailbox stays consistent.
pub(crate) fn process_mailbox(core: &FrameworkCore, worker: &WorkerContext, mailbox: &MailboxRef) {
    worker.bump(Counter::MessagesProcessed);

    let (actor, front) = {
        let mut mb = mailbox.lock();
        mb.pin();
        (mb.actor(), mb.front())
    };

    let Some(front) = front else {
        // Scheduling guarantees a ready mailbox is non-empty; tolerate a
        // broken invariant rather than take the worker down.
        error!(mailbox = mailbox.index(), "ready mailbox was empty");
        mailbox.lock().unpin();
        return;
    };

    let view = unsafe { MessageView::from_raw(front) };

    if let Some(actor) = &actor {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| actor.process(core, view)));
        if outcome.is_err() {
            error!(mailbox = mailbox.index(), "message handler panicked");
        }
    }

    mailbox.lock().unpin();

    if actor.is_none() {
        // The fallback handler is user code as well; a panic in it must not
        // take the worker down with the retirement accounting unsettled.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            core.fallback_handlers().handle(&view);
        }));
        if outcome.is_err() {
            error!(mailbox = mailbox.index(), "fallback handler panicked");
        }
    }

    // Pop the dispatched message and reschedule the mailbox if more arrived
    // while the handler ran. The work queue push happens under the mailbox
    // lock, same as on the send path, keeping the at-most-once invariant.
    let message = {
        let mut mb = mailbox.lock();
        let message = mb.pop();
        if !mb.is_empty() {
            core.work_queue().push(mailbox.clone());
            worker.bump(Counter::MailboxRequeues);
        }
        message
    };

    if let Some(message) = message {
        message.release(core.message_allocator());
    }
}
