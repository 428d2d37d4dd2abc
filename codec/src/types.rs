//! Core identifier types for the codec.

use std::fmt;

/// Stable identity of a networked object within its list.
///
/// Handles are allocated from a monotonic counter and never reused within a
/// session, so a destroyed handle can never be confused with a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectHandle(u32);

impl ObjectHandle {
    /// Creates a new object handle.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ObjectHandle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<ObjectHandle> for u32 {
    fn from(handle: ObjectHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an object list, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ListId(u32);

impl ListId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ListId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Identifier of a connected client, chosen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientId(u32);

impl ClientId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ClientId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client {}", self.0)
    }
}

/// A frame sequence number.
///
/// Each client sees its own increasing sequence starting at 1; zero means
/// "nothing yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sequence(u32);

impl Sequence {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if this is the "nothing yet" sequence.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The following sequence, or `None` when the counter is exhausted.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl From<u32> for Sequence {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Sequence> for u32 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}
