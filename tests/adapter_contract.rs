//! Adapter contract tests.
//!
//! Runs the same behavioural checks against every backend that needs no
//! server: `SQLite` in memory and the CSV backend over an in-memory
//! content store.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use murmur::config::CacheConfig;
use murmur::storage::github::MemoryContentStore;
use murmur::storage::sql::SqliteExecutor;
use murmur::{
    CountResult, Filter, Logic, QueryOptions, Record, StorageAdapter, StorageBackendType,
    StorageFactory, UpdateData, Value,
};
use std::sync::Arc;
use test_case::test_case;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Sqlite,
    Csv,
}

fn no_cache() -> CacheConfig {
    CacheConfig {
        enabled: Some(false),
        ..CacheConfig::default()
    }
}

async fn factory(backend: Backend) -> StorageFactory {
    match backend {
        Backend::Sqlite => {
            let executor = Arc::new(SqliteExecutor::in_memory().unwrap());
            let factory =
                StorageFactory::relational(StorageBackendType::Sqlite, executor, "wl_", no_cache());
            factory.ensure_schema().await.unwrap();
            factory
        },
        Backend::Csv => {
            StorageFactory::files(Arc::new(MemoryContentStore::new()), "data", no_cache())
        },
    }
}

async fn seed(adapter: &Arc<dyn StorageAdapter>, records: Vec<Record>) -> Vec<String> {
    let mut ids = Vec::new();
    for record in records {
        let added = adapter.add(record).await.unwrap();
        ids.push(added.object_id().unwrap().to_string());
    }
    ids
}

fn times(records: &[Record]) -> Vec<i64> {
    let mut times: Vec<i64> = records
        .iter()
        .filter_map(|r| r.get("time").and_then(Value::as_i64))
        .collect();
    times.sort_unstable();
    times
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_add_then_select_by_object_id(backend: Backend) {
    let factory = factory(backend).await;
    let comments = factory.adapter("Comment");
    let added = comments
        .add(
            Record::new()
                .with("nick", "Alice")
                .with("comment", "hello")
                .with("url", "/p/1"),
        )
        .await
        .unwrap();
    let id = added.object_id().unwrap().to_string();

    let rows = comments
        .select(&Filter::by_id(id.as_str()), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].object_id(), Some(id.as_str()));
    assert_eq!(rows[0].get("nick"), Some(&Value::from("Alice")));
    assert_eq!(rows[0].get("comment"), Some(&Value::from("hello")));
    assert_eq!(rows[0].get("url"), Some(&Value::from("/p/1")));
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_text_that_looks_typed_round_trips(backend: Backend) {
    let factory = factory(backend).await;
    let users = factory.adapter("Users");
    let added = users
        .add(
            Record::new()
                .with("display_name", "42")
                .with("label", "true")
                .with("url", "1.50")
                .with("avatar", "2024-01-02T03:04:05Z"),
        )
        .await
        .unwrap();
    let id = added.object_id().unwrap().to_string();

    let rows = users
        .select(&Filter::by_id(id.as_str()), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("display_name"), Some(&Value::from("42")));
    assert_eq!(rows[0].get("label"), Some(&Value::from("true")));
    assert_eq!(rows[0].get("url"), Some(&Value::from("1.50")));
    assert_eq!(rows[0].get("avatar"), Some(&Value::from("2024-01-02T03:04:05Z")));
}

#[test_case("%llo w%", true ; "contains")]
#[test_case("hello%", true ; "prefix")]
#[test_case("%world", true ; "suffix")]
#[test_case("hello world", true ; "exact")]
#[test_case("%", true ; "anything")]
#[test_case("world%", false ; "wrong prefix")]
#[test_case("%hello", false ; "wrong suffix")]
#[test_case("%HELLO%", false ; "case sensitive")]
#[test_case("%o_w%", false ; "underscore is literal")]
#[tokio::test]
async fn test_like_patterns(pattern: &str, expected: bool) {
    for backend in [Backend::Sqlite, Backend::Csv] {
        let factory = factory(backend).await;
        let comments = factory.adapter("Comment");
        seed(&comments, vec![Record::new().with("comment", "hello world")]).await;

        let rows = comments
            .select(&Filter::new().like("comment", pattern), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len() == 1, expected, "{backend:?} {pattern}");

        let rows = comments
            .select(&Filter::new().like("nick", pattern), &QueryOptions::default())
            .await
            .unwrap();
        assert!(rows.is_empty(), "{backend:?}: null never matches {pattern}");
    }
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_grouped_count(backend: Backend) {
    let factory = factory(backend).await;
    let counters = factory.adapter("Counter");
    seed(
        &counters,
        vec![
            Record::new().with("reaction0", 1_i64).with("reaction1", 1_i64),
            Record::new().with("reaction0", 1_i64).with("reaction1", 1_i64),
            Record::new().with("reaction0", 1_i64).with("reaction1", 2_i64),
        ],
    )
    .await;

    let result = counters
        .count(
            &Filter::new(),
            &QueryOptions::new().group(["reaction0", "reaction1"]),
        )
        .await
        .unwrap();
    let CountResult::Grouped(mut groups) = result else {
        panic!("expected grouped count");
    };
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[0].fields.get("reaction0"), Some(&Value::Int(1)));
    assert_eq!(groups[0].fields.get("reaction1"), Some(&Value::Int(1)));
    assert_eq!(groups[1].count, 1);
    assert_eq!(groups[1].fields.get("reaction1"), Some(&Value::Int(2)));

    let total = counters
        .count(&Filter::new().eq("reaction1", 2_i64), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(total, CountResult::Total(1));
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_update_with_function(backend: Backend) {
    let factory = factory(backend).await;
    let counters = factory.adapter("Counter");
    seed(
        &counters,
        vec![
            Record::new().with("url", "/a").with("time", 3_i64),
            Record::new().with("url", "/b").with("time", 5_i64),
            Record::new().with("url", "/c").with("time", 9_i64),
        ],
    )
    .await;

    let bump = UpdateData::computed(|current| {
        let time = current.get("time").and_then(Value::as_i64).unwrap_or(0);
        Record::new().with("time", time + 1)
    });
    let updated = counters
        .update(&bump, &Filter::new().is_in("url", ["/a", "/b"]))
        .await
        .unwrap();
    assert_eq!(times(&updated), [4, 6]);

    let rows = counters
        .select(&Filter::new(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(times(&rows), [4, 6, 9]);
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_sort_page_and_project(backend: Backend) {
    let factory = factory(backend).await;
    let counters = factory.adapter("Counter");
    seed(
        &counters,
        (1..=5_i64)
            .map(|i| Record::new().with("url", format!("/{i}")).with("time", i))
            .collect(),
    )
    .await;

    let rows = counters
        .select(
            &Filter::new(),
            &QueryOptions::new()
                .desc("time")
                .offset(1)
                .limit(2)
                .fields(["time"]),
        )
        .await
        .unwrap();
    let got: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("time").and_then(Value::as_i64))
        .collect();
    assert_eq!(got, [4, 3]);
    assert!(rows.iter().all(|r| r.object_id().is_some()));
    assert!(rows.iter().all(|r| !r.contains_key("url")));
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_complex_or_and_delete(backend: Backend) {
    let factory = factory(backend).await;
    let comments = factory.adapter("Comment");
    seed(
        &comments,
        vec![
            Record::new().with("status", "approved").with("nick", "a"),
            Record::new().with("status", "spam").with("nick", "b"),
            Record::new().with("status", "waiting").with("nick", "c"),
        ],
    )
    .await;

    let either = Filter::new().complex(
        Logic::Or,
        Filter::new().eq("status", "spam").eq("nick", "c"),
    );
    let rows = comments.select(&either, &QueryOptions::default()).await.unwrap();
    assert_eq!(rows.len(), 2);

    comments.delete(&either).await.unwrap();
    let rows = comments
        .select(&Filter::new(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nick"), Some(&Value::from("a")));
}

#[test_case(Backend::Sqlite ; "sqlite")]
#[test_case(Backend::Csv ; "csv")]
#[tokio::test]
async fn test_null_and_not_equal_semantics(backend: Backend) {
    let factory = factory(backend).await;
    let comments = factory.adapter("Comment");
    seed(
        &comments,
        vec![
            Record::new().with("nick", "a").with("pid", 1_i64),
            Record::new().with("nick", "b"),
        ],
    )
    .await;

    let count = |filter: Filter| {
        let comments = Arc::clone(&comments);
        async move {
            comments
                .count(&filter, &QueryOptions::default())
                .await
                .unwrap()
                .total()
        }
    };
    assert_eq!(count(Filter::new().is_null("pid")).await, 1);
    assert_eq!(count(Filter::new().ne("pid", Value::Null)).await, 1);
    assert_eq!(count(Filter::new().gt("pid", 0_i64)).await, 1);
    assert_eq!(count(Filter::new().is_in("pid", Vec::<i64>::new())).await, 0);
    assert_eq!(count(Filter::new().not_in("pid", Vec::<i64>::new())).await, 2);
}

#[tokio::test]
async fn test_cache_serves_reads_until_a_write() {
    let store = Arc::new(MemoryContentStore::new());
    let cache = CacheConfig {
        enabled: Some(true),
        ..CacheConfig::default()
    };
    let factory = StorageFactory::files(store.clone(), "", cache);
    let users = factory.adapter("Users");
    seed(&users, vec![Record::new().with("email", "a@x")]).await;

    let all = Filter::new();
    let options = QueryOptions::default();
    assert_eq!(users.select(&all, &options).await.unwrap().len(), 1);

    // Changed behind the adapter's back: the cached result is still served.
    store.insert("Users.csv", "objectId,email\nx,a@x\ny,b@x\nz,c@x\n");
    assert_eq!(users.select(&all, &options).await.unwrap().len(), 1);

    users.add(Record::new().with("email", "d@x")).await.unwrap();
    assert_eq!(users.select(&all, &options).await.unwrap().len(), 4);
    assert_eq!(users.count(&all, &options).await.unwrap().total(), 4);

    users
        .update(
            &UpdateData::from(Record::new().with("label", "vip")),
            &Filter::by_id("x"),
        )
        .await
        .unwrap();
    let vip = users
        .select(&Filter::new().eq("label", "vip"), &options)
        .await
        .unwrap();
    assert_eq!(vip.len(), 1);

    users.delete(&Filter::by_id("y")).await.unwrap();
    assert_eq!(users.count(&all, &options).await.unwrap().total(), 3);
}

#[tokio::test]
async fn test_sqlite_set_sequence_moves_next_id() {
    let factory = factory(Backend::Sqlite).await;
    let users = factory.adapter("Users");
    seed(&users, vec![Record::new().with("email", "a@x")]).await;
    users.set_sequence(1000).await.unwrap();
    let ids = seed(&users, vec![Record::new().with("email", "b@x")]).await;
    assert_eq!(ids, ["1000"]);
}
