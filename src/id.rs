//! Compact, monotonically allocated identifiers.
//!
//! A compact, monotonically allocated identifier unique within a Cortex,
//! with O(1) comparison — a counter gives this directly without pulling in
//! the `uuid` crate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-unique, monotonically increasing identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Id(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocator backing a single Cortex's `Id` space. Held as a field on
/// `Cortex` rather than as a crate-wide static so a future multi-Cortex
/// embedding (tests constructing more than one Cortex) stays well-defined.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> Id {
        Id::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
