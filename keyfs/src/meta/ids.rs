//! Identifier allocation for new metadata records.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out identifiers for new records and their content.
pub trait IdAllocator: Send + Sync {
    fn next_id(&self) -> u32;
}

/// Uniformly random identifiers over the full `u32` space.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdAllocator for RandomIds {
    fn next_id(&self) -> u32 {
        rand::random()
    }
}

/// Monotonic identifiers starting at a fixed value.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU32,
}

impl SequentialIds {
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        // 0 is the root record
        Self::starting_at(1)
    }
}

impl IdAllocator for SequentialIds {
    fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
