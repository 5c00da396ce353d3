//! Schema checks for the embedded migrations.

use questpath_db::pool;
use questpath_test_utils::TestDb;

#[tokio::test]
async fn migrations_create_expected_tables() {
    let db = TestDb::new().await;

    let counts = pool::table_counts(&db.pool).await.unwrap();
    let names: Vec<&str> = counts.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["users", "goals", "plans", "stages", "events"]);
    assert!(counts.iter().all(|(_, count)| *count == 0));

    db.teardown().await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = TestDb::new().await;

    pool::run_migrations(&db.pool)
        .await
        .expect("re-running applied migrations should be a no-op");

    db.teardown().await;
}
