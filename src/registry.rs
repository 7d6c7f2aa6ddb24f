//! Process-wide framework registry.
//!
//! Frameworks claim a non-zero index at construction; the index is the first
//! component of every address hosted by that framework and is how messages
//! addressed to a different framework in the same process find their target.
//! This is the only process-global state in the runtime.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use crate::framework::FrameworkCore;

struct RegistryInner {
    /// Slot 0 is permanently empty; framework indices start at 1.
    slots: Vec<Option<Weak<FrameworkCore>>>,
    free: Vec<u32>,
}

fn registry() -> &'static Mutex<RegistryInner> {
    static REGISTRY: OnceLock<Mutex<RegistryInner>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(RegistryInner {
            slots: vec![None],
            free: Vec::new(),
        })
    })
}

/// Claims an index for the framework, reusing a released one if available.
pub(crate) fn register(core: &Arc<FrameworkCore>) -> u32 {
    let mut inner = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let index = match inner.free.pop() {
        Some(index) => index,
        None => {
            inner.slots.push(None);
            (inner.slots.len() - 1) as u32
        }
    };
    inner.slots[index as usize] = Some(Arc::downgrade(core));
    index
}

/// Releases a previously claimed index.
pub(crate) fn deregister(index: u32) {
    let mut inner = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(slot) = inner.slots.get_mut(index as usize) {
        if slot.take().is_some() {
            inner.free.push(index);
        }
    }
}

/// Resolves a framework index to a live framework, if one is registered.
pub(crate) fn lookup(index: u32) -> Option<Arc<FrameworkCore>> {
    let inner = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    inner.slots.get(index as usize)?.as_ref()?.upgrade()
}
