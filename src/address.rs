use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Stable identifier for a mailbox.
///
/// An address pairs the non-zero index of the owning framework with the index
/// of the mailbox inside that framework, and optionally carries the mailbox
/// name. Two addresses compare equal iff both indices match; the name does
/// not participate in equality. Index 0 is reserved as null on both
/// components.
#[derive(Clone, Debug, Default)]
pub struct Address {
    framework: u32,
    index: u32,
    name: Option<Arc<str>>,
}

impl Address {
    /// The null address. Valid as a `from` address for senders that do not
    /// expect replies; never a valid destination.
    pub const fn null() -> Self {
        Self {
            framework: 0,
            index: 0,
            name: None,
        }
    }

    /// An address referring to a mailbox by raw indices.
    pub fn new(framework: u32, index: u32) -> Self {
        Self {
            framework,
            index,
            name: None,
        }
    }

    /// A name-only address. Resolved against the local directory first and
    /// handed to the network endpoint when the name is not known locally.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            framework: 0,
            index: 0,
            name: Some(name.into()),
        }
    }

    pub(crate) fn with_name(framework: u32, index: u32, name: Option<Arc<str>>) -> Self {
        Self {
            framework,
            index,
            name,
        }
    }

    /// Index of the framework hosting the mailbox; 0 for null and name-only
    /// addresses.
    pub fn framework(&self) -> u32 {
        self.framework
    }

    /// Index of the mailbox within its framework; 0 for null and name-only
    /// addresses.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The mailbox name, if one is attached to this address.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_null(&self) -> bool {
        self.index == 0 && self.name.is_none()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.framework == other.framework && self.index == other.index
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.framework.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}.{}", name, self.framework, self.index),
            None => write!(f, "{}.{}", self.framework, self.index),
        }
    }
}
