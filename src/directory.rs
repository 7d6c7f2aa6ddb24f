use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use spin::Mutex;

use crate::actor::AnyActor;
use crate::error::RegistrationError;
use crate::mailbox::{Mailbox, MailboxRef};
use crate::scheduler::yields;

/// Per-framework table of mailbox slots.
///
/// Indices are dense from 1 upwards; index 0 is reserved as null. Freed slots
/// are reused. A user-named slot persists across actor lifetimes and can be
/// rebound by registering a new actor under the same name; unnamed slots are
/// reclaimed when their actor deregisters.
///
/// All operations serialize on the directory spinlock. Taking a mailbox lock
/// while holding the directory lock is the sanctioned nesting order; the
/// reverse never happens.
pub(crate) struct Directory {
    inner: Mutex<DirectoryInner>,
}

struct DirectoryInner {
    /// Slot 0 is permanently empty.
    slots: Vec<Option<MailboxRef>>,
    free: Vec<u32>,
    names: HashMap<Arc<str>, u32>,
}

impl Directory {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(DirectoryInner {
                slots: vec![None],
                free: Vec::new(),
                names: HashMap::new(),
            }),
        }
    }

    /// Allocates a slot (or finds the existing slot for `name`) and binds the
    /// actor produced by `make_actor`, which receives the mailbox index.
    pub(crate) fn register<F>(
        &self,
        name: Option<Arc<str>>,
        make_actor: F,
    ) -> Result<(u32, MailboxRef), RegistrationError>
    where
        F: FnOnce(u32) -> Arc<dyn AnyActor>,
    {
        // FnOnce threaded through the pin-wait loop below.
        let mut make_actor = Some(make_actor);
        let mut spin = 0u32;

        loop {
            {
                let mut inner = self.inner.lock();

                let existing = name
                    .as_ref()
                    .and_then(|name| inner.names.get(name).copied());
                match existing {
                    Some(index) => {
                        // Named slots survive deregistration; rebinding is
                        // allowed only while no actor is bound, and must wait
                        // out a worker that still has the mailbox pinned.
                        let mailbox = inner.slots[index as usize]
                            .clone()
                            .expect("named slot must exist");
                        let mut mb = mailbox.lock();
                        if mb.is_bound() {
                            let name = name.as_deref().unwrap_or_default();
                            return Err(RegistrationError::NameTaken(name.to_string()));
                        }
                        if !mb.is_pinned() {
                            let make_actor =
                                make_actor.take().expect("registration retried after success");
                            mb.bind_actor(make_actor(index));
                            drop(mb);
                            return Ok((index, mailbox));
                        }
                    }
                    None => {
                        let index = match inner.free.pop() {
                            Some(index) => index,
                            None => {
                                if inner.slots.len() > u32::MAX as usize {
                                    return Err(RegistrationError::DirectoryFull);
                                }
                                inner.slots.push(None);
                                (inner.slots.len() - 1) as u32
                            }
                        };

                        let make_actor =
                            make_actor.take().expect("registration retried after success");
                        let mailbox: MailboxRef = Arc::new(CachePadded::new(Mailbox::new(index)));
                        {
                            let mut mb = mailbox.lock();
                            mb.set_name(name.clone());
                            mb.bind_actor(make_actor(index));
                        }
                        inner.slots[index as usize] = Some(mailbox.clone());
                        if let Some(name) = name {
                            inner.names.insert(name, index);
                        }
                        return Ok((index, mailbox));
                    }
                }
            }
            yields::backoff(&mut spin);
        }
    }

    /// Clears the actor binding of the given slot, waiting until the mailbox
    /// is unpinned so that no handler is still running when this returns.
    /// Unnamed slots are reclaimed for reuse; named slots persist.
    pub(crate) fn deregister(&self, index: u32) {
        let mut spin = 0u32;
        loop {
            {
                let mut inner = self.inner.lock();
                let mailbox = match inner.slots.get(index as usize) {
                    Some(Some(mailbox)) => mailbox.clone(),
                    _ => return,
                };

                let mut mb = mailbox.lock();
                if !mb.is_pinned() {
                    mb.unbind_actor();
                    if mb.name().is_none() {
                        drop(mb);
                        inner.slots[index as usize] = None;
                        inner.free.push(index);
                    }
                    return;
                }
            }
            yields::backoff(&mut spin);
        }
    }

    pub(crate) fn lookup(&self, index: u32) -> Option<MailboxRef> {
        let inner = self.inner.lock();
        inner.slots.get(index as usize)?.clone()
    }

    pub(crate) fn lookup_by_name(&self, name: &str) -> Option<MailboxRef> {
        let inner = self.inner.lock();
        let index = *inner.names.get(name)?;
        inner.slots.get(index as usize)?.clone()
    }

    /// Number of slots with a live actor binding.
    pub(crate) fn bound_actors(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .filter(|mailbox| mailbox.lock().is_bound())
            .count()
    }
}
