//! Injected identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// A source of fresh row identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produces a new unique id.
    fn generate(&self) -> Uuid;
}

/// Random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic ids for tests: a counter embedded in an otherwise-fixed
/// UUID, so test assertions can predict every generated id.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u64_pair(0, n)
    }
}
