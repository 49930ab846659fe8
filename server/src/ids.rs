//! Entity identity allocation.
//!
//! Identities are small integers drawn from a bounded namespace. The
//! allocator itself is stateless: [`find_empty_id`] scans a caller-owned live
//! set, and [`IdNamespace`] is the owned set used where identities must be
//! reserved ahead of the entity they belong to.

use std::collections::HashSet;

/// Upper bound of an identity namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdLimit {
    /// Identities in `0..limit`.
    Bounded(u32),
    /// Every `u32` except `u32::MAX`. The scan still terminates.
    Unbounded,
}

impl IdLimit {
    fn end(self) -> u32 {
        match self {
            IdLimit::Bounded(limit) => limit,
            IdLimit::Unbounded => u32::MAX,
        }
    }
}

/// Returns the smallest identity below `limit` for which `is_live` is false.
pub fn find_empty_id<F>(is_live: F, limit: IdLimit) -> Option<u32>
where
    F: Fn(u32) -> bool,
{
    (0..limit.end()).find(|&id| !is_live(id))
}

/// A namespace of reserved identities.
#[derive(Debug, Clone)]
pub struct IdNamespace {
    live: HashSet<u32>,
    limit: IdLimit,
}

impl IdNamespace {
    /// Creates an empty namespace bounded by `limit`.
    pub fn new(limit: IdLimit) -> Self {
        Self {
            live: HashSet::new(),
            limit,
        }
    }

    /// Reserves the smallest free identity, or `None` if the namespace is full.
    pub fn allocate(&mut self) -> Option<u32> {
        let id = find_empty_id(|id| self.live.contains(&id), self.limit)?;
        self.live.insert(id);
        Some(id)
    }

    /// Returns an identity to the namespace. Releasing a free identity is a no-op.
    pub fn release(&mut self, id: u32) -> bool {
        self.live.remove(&id)
    }

    /// Checks whether `id` is reserved.
    pub fn is_live(&self, id: u32) -> bool {
        self.live.contains(&id)
    }

    /// Number of reserved identities.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Checks whether nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
