//! Live backend tests.
//!
//! Run the adapter contract against a real server selected by the usual
//! backend variables (`MONGO_DB`, `PG_DB`, `MYSQL_DB`, `TIDB_DB`, ...).
//! These tests write to and clear the configured tables, so they only run
//! when `MURMUR_TEST_LIVE` is set:
//!
//! ```bash
//! export MURMUR_TEST_LIVE=1 PG_DB=murmur_test PG_USER=postgres PG_PASSWORD=secret
//! cargo test --test live_backends
//! ```

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::print_stderr
)]

use murmur::models::TABLES;
use murmur::services::TransferService;
use murmur::{
    CountResult, Error, Filter, QueryOptions, Record, StorageBackendType, StorageConfig,
    StorageFactory, UpdateData, Value,
};
use std::env;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Environment variable enabling these tests.
const LIVE_ENV: &str = "MURMUR_TEST_LIVE";

/// The tests share the server's tables, so they run one at a time.
static LIVE_LOCK: Mutex<()> = Mutex::const_new(());

/// Macro to skip tests when no live backend is configured.
macro_rules! require_live {
    () => {
        match live_factory().await {
            Some(live) => live,
            None => {
                eprintln!("Skipping test: {LIVE_ENV} not set.");
                return;
            },
        }
    };
}

async fn live_factory() -> Option<(MutexGuard<'static, ()>, Arc<StorageFactory>)> {
    env::var(LIVE_ENV).ok()?;
    let guard = LIVE_LOCK.lock().await;
    let config = StorageConfig::from_env().expect("live tests need a configured backend");
    let factory = Arc::new(StorageFactory::connect(&config).await.unwrap());
    factory.ensure_schema().await.unwrap();
    let service = TransferService::new(Arc::clone(&factory));
    for table in TABLES {
        service.clear(table).await.unwrap();
    }
    Some((guard, factory))
}

#[tokio::test]
async fn test_live_round_trip_and_update() {
    let (_guard, factory) = require_live!();
    let comments = factory.adapter("Comment");

    let added = comments
        .add(
            Record::new()
                .with("nick", "live")
                .with("comment", "hello world")
                .with("like", 3_i64),
        )
        .await
        .unwrap();
    let id = added.object_id().unwrap().to_string();

    let rows = comments
        .select(&Filter::by_id(id.as_str()), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nick"), Some(&Value::from("live")));

    let rows = comments
        .select(&Filter::new().like("comment", "hello%"), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let bump = UpdateData::computed(|current| {
        let like = current.get("like").and_then(Value::as_i64).unwrap_or(0);
        Record::new().with("like", like + 1)
    });
    let updated = comments
        .update(&bump, &Filter::by_id(id.as_str()))
        .await
        .unwrap();
    assert_eq!(updated[0].get("like").and_then(Value::as_i64), Some(4));

    comments.delete(&Filter::by_id(id.as_str())).await.unwrap();
    let total = comments
        .count(&Filter::new(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(total.total(), 0);
}

#[tokio::test]
async fn test_live_grouped_count() {
    let (_guard, factory) = require_live!();
    let counters = factory.adapter("Counter");
    for (a, b) in [(1_i64, 1_i64), (1, 1), (1, 2)] {
        counters
            .add(Record::new().with("reaction0", a).with("reaction1", b))
            .await
            .unwrap();
    }
    let CountResult::Grouped(mut groups) = counters
        .count(
            &Filter::new(),
            &QueryOptions::new().group(["reaction0", "reaction1"]),
        )
        .await
        .unwrap()
    else {
        panic!("expected grouped count");
    };
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].fields.get("reaction1").and_then(Value::as_i64), Some(2));
}

#[tokio::test]
async fn test_live_set_sequence() {
    let (_guard, factory) = require_live!();
    let users = factory.adapter("Users");
    let result = users.set_sequence(500).await;
    match factory.backend_type() {
        StorageBackendType::MongoDb | StorageBackendType::GitHub => {
            assert!(matches!(result, Err(Error::Unsupported { .. })));
        },
        _ => {
            result.unwrap();
            let added = users.add(Record::new().with("email", "seq@x")).await.unwrap();
            assert_eq!(added.object_id(), Some("500"));
        },
    }
}
