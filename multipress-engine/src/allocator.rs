//! Identifier allocation
//!
//! Fresh identifiers are the prefix followed by a number strictly greater than
//! every numeric suffix already in use. The allocator is seeded once from the
//! existing credential keys and then hands out numbers from an atomic counter,
//! so concurrent callers never receive the same identifier.

use multipress_core::Identifier;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct IdentifierAllocator {
    prefix: String,
    last: AtomicU64,
}

impl IdentifierAllocator {
    /// Seeds the allocator with the highest suffix among `existing`
    ///
    /// Keys that do not start with `prefix` or whose suffix is not a plain
    /// decimal number are ignored.
    pub fn from_existing<'a>(
        prefix: impl Into<String>,
        existing: impl IntoIterator<Item = &'a Identifier>,
    ) -> Self {
        let prefix = prefix.into();
        let max = existing
            .into_iter()
            .filter_map(|id| id.numeric_suffix(&prefix))
            .max()
            .unwrap_or(0);

        debug!("Identifier allocator for '{}' seeded at {}", prefix, max);

        Self {
            prefix,
            last: AtomicU64::new(max),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reserves the next identifier
    pub fn next_identifier(&self) -> Identifier {
        let number = self.last.fetch_add(1, Ordering::SeqCst) + 1;
        Identifier::with_suffix(&self.prefix, number)
    }

    /// Reserves `count` identifiers in increasing order
    pub fn allocate(&self, count: usize) -> Vec<Identifier> {
        (0..count).map(|_| self.next_identifier()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn ids(values: &[&str]) -> Vec<Identifier> {
        values.iter().map(|v| Identifier::from(*v)).collect()
    }

    #[test]
    fn test_starts_at_one_when_empty() {
        let allocator = IdentifierAllocator::from_existing("user", &[]);
        assert_eq!(allocator.allocate(3), ids(&["user1", "user2", "user3"]));
    }

    #[test]
    fn test_continues_after_highest_suffix() {
        let existing = ids(&["user2", "user10", "user3"]);
        let allocator = IdentifierAllocator::from_existing("user", &existing);
        assert_eq!(allocator.next_identifier(), Identifier::from("user11"));
    }

    #[test]
    fn test_ignores_malformed_suffixes() {
        let existing = ids(&["user4", "userX", "user", "admin99", "user-7", "user5b"]);
        let allocator = IdentifierAllocator::from_existing("user", &existing);
        assert_eq!(allocator.next_identifier(), Identifier::from("user5"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_is_distinct() {
        const N: u64 = 200;
        let allocator = Arc::new(IdentifierAllocator::from_existing("user", &[]));

        let mut handles = Vec::new();
        for _ in 0..N {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move { allocator.next_identifier() }));
        }

        let mut suffixes = HashSet::new();
        for handle in handles {
            let id = handle.await.unwrap();
            assert!(suffixes.insert(id.numeric_suffix("user").unwrap()));
        }

        let expected: HashSet<u64> = (1..=N).collect();
        assert_eq!(suffixes, expected);
    }

    proptest! {
        #[test]
        fn prop_allocated_suffixes_exceed_existing(
            existing in proptest::collection::vec(0u64..10_000, 0..20),
            count in 1usize..50,
        ) {
            let keys: Vec<Identifier> = existing
                .iter()
                .map(|n| Identifier::with_suffix("user", *n))
                .collect();
            let max = existing.iter().copied().max().unwrap_or(0);

            let allocator = IdentifierAllocator::from_existing("user", &keys);
            let allocated = allocator.allocate(count);

            let suffixes: Vec<u64> = allocated
                .iter()
                .map(|id| id.numeric_suffix("user").unwrap())
                .collect();
            let expected: Vec<u64> = (max + 1..=max + count as u64).collect();
            prop_assert_eq!(suffixes, expected);
        }
    }
}
