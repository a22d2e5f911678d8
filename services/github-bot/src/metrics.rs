//! Request Metrics
//!
//! Informational counter of calls made to the GitHub API.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts GitHub API calls.
///
/// Incremented from concurrently running requests, read and reset by the poll
/// orchestrator at the end of every cycle.
#[derive(Debug, Default)]
pub struct RequestCounter {
    count: AtomicU64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request, returning the new total.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Reset to zero, returning the count accumulated so far.
    pub fn reset(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_reset() {
        let counter = RequestCounter::new();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.get(), 2);

        assert_eq!(counter.reset(), 2);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let counter = Arc::new(RequestCounter::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        counter.increment();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.get(), 800);
    }
}
