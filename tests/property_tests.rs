//! Property-based tests for the filter language.
//!
//! Uses proptest to verify invariants across random inputs:
//! - `IN` and `NOT IN` over the same set partition any table
//! - The in-memory predicate and `SQLite` agree on that partition
//! - `LIKE` pattern splitting keeps the literal text

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use murmur::config::CacheConfig;
use murmur::storage::github::matches;
use murmur::storage::sql::SqliteExecutor;
use murmur::{Filter, LikePattern, QueryOptions, Record, StorageBackendType, StorageFactory};
use proptest::prelude::*;
use std::sync::Arc;

/// A column value: absent (null) or one of a few small integers.
fn cell() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(0_i64..6)
}

fn record(id: usize, like: Option<i64>) -> Record {
    let record = Record::new().with("objectId", id.to_string());
    match like {
        Some(n) => record.with("like", n),
        None => record,
    }
}

proptest! {
    /// Property: every record matches exactly one of `IN s` and `NOT IN s`.
    #[test]
    fn prop_in_and_not_in_partition(
        cells in prop::collection::vec(cell(), 0..40),
        set in prop::collection::vec(0_i64..6, 0..4),
    ) {
        let inside = Filter::new().is_in("like", set.clone());
        let outside = Filter::new().not_in("like", set);
        for (i, like) in cells.into_iter().enumerate() {
            let record = record(i, like);
            prop_assert!(matches(&inside, &record) != matches(&outside, &record));
        }
    }

    /// Property: `LIKE` splitting keeps the literal text between wildcards.
    #[test]
    fn prop_like_pattern_keeps_needle(text in "[a-z _]{0,12}", lead: bool, trail: bool) {
        let pattern = format!(
            "{}{text}{}",
            if lead { "%" } else { "" },
            if trail { "%" } else { "" },
        );
        let parsed = LikePattern::parse(&pattern);
        prop_assert_eq!(parsed.needle(), text.as_str());

        let haystack = format!(
            "{}{text}{}",
            if lead { "x" } else { "" },
            if trail { "y" } else { "" },
        );
        prop_assert!(parsed.matches(&haystack));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: `SQLite` partitions the same way as the in-memory predicate.
    #[test]
    fn prop_sqlite_in_not_in_partition(
        cells in prop::collection::vec(cell(), 0..12),
        set in prop::collection::vec(0_i64..6, 0..4),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (inside, outside, total) = runtime.block_on(async {
            let executor = Arc::new(SqliteExecutor::in_memory().unwrap());
            let factory = StorageFactory::relational(
                StorageBackendType::Sqlite,
                executor,
                "wl_",
                CacheConfig::default(),
            );
            factory.ensure_schema().await.unwrap();
            let comments = factory.adapter("Comment");
            for like in &cells {
                let record = match like {
                    Some(n) => Record::new().with("like", *n),
                    None => Record::new(),
                };
                comments.add(record).await.unwrap();
            }
            let options = QueryOptions::default();
            let count = |filter: Filter| {
                let comments = Arc::clone(&comments);
                let options = options.clone();
                async move { comments.count(&filter, &options).await.unwrap().total() }
            };
            (
                count(Filter::new().is_in("like", set.clone())).await,
                count(Filter::new().not_in("like", set.clone())).await,
                count(Filter::new()).await,
            )
        });
        prop_assert_eq!(inside + outside, total);
        prop_assert_eq!(total, cells.len() as u64);
    }
}
