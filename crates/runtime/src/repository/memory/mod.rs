//! In-memory repository implementations for testing and development.

mod aggregate;
mod checkpoint;
mod sample;

use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{RepositoryError, Result};

pub use aggregate::InMemoryAggregateRepository;
pub use checkpoint::InMemoryCheckpointRepository;
pub use sample::InMemorySampleRepository;

/// Number of upcoming calls that fail with `Unavailable`.
///
/// Lets tests simulate a store outage or a crash between apply and
/// checkpoint.
#[derive(Debug, Default)]
struct FailurePlan {
    remaining: AtomicU32,
}

impl FailurePlan {
    fn arm(&self, calls: u32) {
        self.remaining.store(calls, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<()> {
        let consumed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match consumed {
            Ok(_) => Err(RepositoryError::Unavailable(format!(
                "injected failure in {}",
                operation
            ))),
            Err(_) => Ok(()),
        }
    }
}
