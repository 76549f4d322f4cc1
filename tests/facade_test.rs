//! Query facade and readiness barrier tests.
//!
//! Tests:
//! - Calls issued before every store opens never reach a driver early
//! - execute / query_many / query_one against real stores
//! - Query failures reach both the caller and the failure log
//! - Writing queries (RETURNING) run on the writer connection
//! - A store failing to open fails readiness for everyone

mod common;

use common::{text, RecordingConnector, TestFixture};
use multistore::storage::{Connector, Storage, StorageOptions, StoreError, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_calls_wait_for_every_store_to_open() {
    let fixture = TestFixture::new();
    let connector = Arc::new(RecordingConnector::new().hold("guild"));
    let log = connector.log.clone();
    let gate = connector.gate.clone();

    let storage = Storage::open(
        fixture.specs(),
        connector.clone() as Arc<dyn Connector>,
        StorageOptions::default(),
    )
    .unwrap();

    let main = storage.store("main").unwrap().clone();
    let image = storage.store("image").unwrap().clone();
    let write = tokio::spawn(async move { main.execute("INSERT early", &[]).await });
    let read = tokio::spawn(async move { image.query_many("SELECT early", &[]).await });

    // main and image are open, guild is held: nothing may run yet.
    assert!(common::wait_for(Duration::from_secs(2), || connector.driver("main").is_some()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.len(), 0, "calls reached a driver before readiness");
    assert!(!write.is_finished());
    assert!(!read.is_finished());
    assert!(!storage.readiness().is_ready());

    gate.open();
    assert_ok!(write.await.unwrap());
    assert_ok!(read.await.unwrap());
    assert!(log.contains("main: INSERT early"));
    assert!(log.contains("image: SELECT early"));

    storage.close_all().await;
}

#[tokio::test]
async fn test_execute_and_queries_against_sqlite() {
    let fixture = TestFixture::new();
    let storage = fixture.connect().await;
    let image = storage.store("image").unwrap();

    image
        .execute_batch("CREATE TABLE image_cache (id INTEGER PRIMARY KEY, file_name TEXT NOT NULL, data BLOB)")
        .await
        .unwrap();

    let first = image
        .execute(
            "INSERT INTO image_cache (file_name, data) VALUES (?1, ?2)",
            &[text("logo.png"), Value::Blob(vec![0x89, 0x50])],
        )
        .await
        .unwrap();
    assert_eq!(first.changes, 1);
    assert_eq!(first.last_insert_rowid, 1);

    image
        .execute(
            "INSERT INTO image_cache (file_name) VALUES (?1)",
            &[text("banner.png")],
        )
        .await
        .unwrap();

    let rows = image
        .query_many("SELECT id, file_name FROM image_cache ORDER BY id", &[])
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().filter_map(|r| r.get_text("file_name")).collect();
    assert_eq!(names, ["logo.png", "banner.png"]);

    let one = image
        .query_one(
            "SELECT data FROM image_cache WHERE file_name = ?1",
            &[text("logo.png")],
        )
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(one.get("data"), Some(&Value::Blob(vec![0x89, 0x50])));

    storage.close_all().await;
}

#[tokio::test]
async fn test_query_one_without_rows_is_none() {
    let fixture = TestFixture::new();
    let storage = fixture.connect().await;
    let main = storage.store("main").unwrap();

    main.execute_batch("CREATE TABLE members (rsn TEXT PRIMARY KEY)")
        .await
        .unwrap();
    let row = main
        .query_one("SELECT rsn FROM members WHERE rsn = ?1", &[text("nobody")])
        .await
        .unwrap();
    assert!(row.is_none());

    let rows = main.query_many("SELECT rsn FROM members", &[]).await.unwrap();
    assert!(rows.is_empty());

    storage.close_all().await;
}

#[tokio::test]
async fn test_query_with_returning_clause_writes() {
    let fixture = TestFixture::new();
    let storage = fixture.connect().await;
    let main = storage.store("main").unwrap();
    main.execute_batch("CREATE TABLE roles (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();

    let row = main
        .query_one(
            "INSERT INTO roles (name) VALUES (?1) RETURNING id",
            &[text("moderator")],
        )
        .await
        .unwrap()
        .expect("RETURNING yields a row");
    assert_eq!(row.get_i64("id"), Some(1));

    let rows = main
        .query_many(
            "UPDATE roles SET name = ?1 RETURNING name",
            &[text("admin")],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_text("name"), Some("admin"));

    let stored = main
        .query_one("SELECT name FROM roles WHERE id = 1", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_text("name"), Some("admin"));

    storage.close_all().await;
}

#[tokio::test]
async fn test_query_failure_is_returned_and_recorded() {
    let fixture = TestFixture::new();
    let storage = fixture.connect().await;
    let mut notices = storage.subscribe_failures();
    let main = storage.store("main").unwrap();

    let err = main
        .query_many("SELECT * FROM no_such_table", &[])
        .await
        .unwrap_err();
    match &err {
        StoreError::Query { store, source } => {
            assert_eq!(store, "main");
            assert_eq!(source.to_string(), "no such table: no_such_table");
        }
        other => panic!("expected query error, got {other:?}"),
    }
    assert!(!err.is_shutdown());

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("notice should arrive")
        .unwrap();
    assert_eq!(notice.store, "main");
    assert_eq!(notice.message, "no such table: no_such_table");
    assert_eq!(notice.occurrences, Some(1));

    let entries = storage.failure_log().entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].store, "main");
    assert!(entries[0].stack.is_some());

    storage.close_all().await;
}

#[tokio::test]
async fn test_store_failing_to_open_fails_readiness() {
    let fixture = TestFixture::new();
    let connector = Arc::new(RecordingConnector::new().fail_open("image"));

    let storage = Storage::open(
        fixture.specs(),
        connector.clone() as Arc<dyn Connector>,
        StorageOptions::default(),
    )
    .unwrap();

    match storage.ready().await {
        Err(StoreError::Connection { store, message }) => {
            assert_eq!(store, "image");
            assert_eq!(message, "unable to open database file");
        }
        other => panic!("expected connection error, got {other:?}"),
    }

    let main = storage.store("main").unwrap();
    assert!(matches!(
        main.execute("INSERT never", &[]).await,
        Err(StoreError::Connection { .. })
    ));
    assert!(!connector.log.contains("main: INSERT never"));

    storage.close_all().await;
}

#[tokio::test]
async fn test_connect_surfaces_open_failure() {
    let fixture = TestFixture::new();
    let connector: Arc<dyn Connector> = Arc::new(RecordingConnector::new().fail_open("guild"));

    let result = Storage::connect(fixture.specs(), connector, StorageOptions::default()).await;
    assert!(matches!(result, Err(StoreError::Connection { store, .. }) if store == "guild"));
}
