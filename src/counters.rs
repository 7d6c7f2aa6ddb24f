/// Performance event counters maintained per worker thread.
///
/// Counters measure pool activity inside a single framework and are useful
/// for tuning its thread count. Query them through
/// [`Framework::counter_value`](crate::Framework::counter_value) and
/// [`Framework::per_thread_counter_values`](crate::Framework::per_thread_counter_values).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Messages dispatched by the worker threads.
    MessagesProcessed = 0,
    /// Times a worker found the ready queue empty and ran its yield policy.
    Yields,
    /// Mailboxes re-enqueued because messages remained after a dispatch.
    MailboxRequeues,
}

impl Counter {
    /// Number of distinct counters.
    pub const COUNT: usize = 3;

    /// Every counter, in index order.
    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::MessagesProcessed,
        Counter::Yields,
        Counter::MailboxRequeues,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}
