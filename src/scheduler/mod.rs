pub(crate) mod processor;
pub(crate) mod thread_pool;
pub(crate) mod work_queue;
pub(crate) mod yields;
