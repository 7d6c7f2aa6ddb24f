use std::hint;
use std::thread;
use std::time::Duration;

use crate::scheduler::work_queue::WorkQueue;

/// Idle behaviour of worker threads that find the ready queue empty.
///
/// The polite default frees the processor during quiet periods at the cost of
/// a small wakeup latency. The stronger strategies trade CPU time for lower
/// worst-case latency and suit pools pinned to dedicated cores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum YieldStrategy {
    /// Spin briefly, then sleep until woken by a push.
    #[default]
    Polite,
    /// Spin and yield to other threads, but never sleep.
    Strong,
    /// Spin without yielding or sleeping.
    Aggressive,
}

/// How long a polite worker sleeps per wait; also the granularity at which
/// sleeping workers re-check the thread target.
const SLEEP_QUANTUM: Duration = Duration::from_millis(1);

/// Escalating idle policy run by a worker between failed pops. The counter
/// resets whenever the worker finds work.
pub(crate) struct YieldPolicy {
    strategy: YieldStrategy,
    counter: u32,
}

impl YieldPolicy {
    pub(crate) fn new(strategy: YieldStrategy) -> Self {
        Self {
            strategy,
            counter: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.counter = 0;
    }

    pub(crate) fn idle(&mut self, queue: &WorkQueue) {
        self.counter += 1;
        match self.strategy {
            YieldStrategy::Polite => polite(self.counter, queue),
            YieldStrategy::Strong => strong(self.counter),
            YieldStrategy::Aggressive => aggressive(self.counter),
        }
    }
}

fn spin(iterations: u32) {
    for _ in 0..iterations {
        hint::spin_loop();
    }
}

fn polite(counter: u32, queue: &WorkQueue) {
    if counter < 10 {
        hint::spin_loop();
    } else if counter < 20 {
        spin(50);
    } else if counter < 24 {
        thread::yield_now();
    } else {
        queue.sleep(SLEEP_QUANTUM);
    }
}

fn strong(counter: u32) {
    if counter < 10 {
        hint::spin_loop();
    } else if counter < 20 {
        spin(50);
    } else {
        thread::yield_now();
    }
}

fn aggressive(counter: u32) {
    if counter < 10 {
        hint::spin_loop();
    } else if counter < 20 {
        spin(50);
    } else if counter < 22 {
        spin(100);
    } else {
        spin(200);
    }
}

/// Wastes cycles between retries of a shared-state check, escalating from
/// spinning through yielding to sleeping. Used by registration pin-waits and
/// the framework teardown drains.
pub(crate) fn backoff(counter: &mut u32) {
    *counter += 1;
    if *counter < 10 {
        hint::spin_loop();
    } else if *counter < 20 {
        thread::yield_now();
    } else {
        thread::sleep(SLEEP_QUANTUM);
    }
}
