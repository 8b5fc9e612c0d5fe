use std::sync::Arc;

use serde_json::json;
use toolaudit_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, SqliteAdapter};
use toolaudit_journal::{stage, EventStore, JournalConfig};

fn file_pool(dir: &tempfile::TempDir, pool_max_size: u32) -> DbPool {
    let path = dir.path().join("journal.db");
    let pool = create_pool(
        path.to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings {
            busy_timeout_ms: 5000,
            pool_max_size,
            ..DbRuntimeSettings::default()
        },
    )
    .expect("failed to create pool");
    {
        let conn = pool.get().expect("failed to get connection");
        run_migrations(&conn).expect("failed to run migrations");
    }
    pool
}

#[tokio::test]
async fn test_events_survive_restart() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let tip = {
        let store = EventStore::new(
            Arc::new(SqliteAdapter::new(file_pool(&dir, 2))),
            JournalConfig::default(),
        );
        for step in [stage::PROPOSED, stage::VALIDATED, stage::EXECUTED] {
            store
                .append("req-1", step, &json!({"tool": "READ_FILE"}), Some("plan-1"))
                .await
                .expect("failed to append");
        }
        store.verify_chain().await.expect("chain should verify").tip
    };

    // "Restart": a new pool and store over the same file.
    let adapter = Arc::new(SqliteAdapter::new(file_pool(&dir, 2)));
    let cold = EventStore::new(adapter.clone(), JournalConfig::default());
    assert_eq!(cold.size(), 0, "a new store does not read the row count");
    assert_eq!(cold.sync_size().await.expect("failed to sync"), 3);

    let store = EventStore::open(adapter, JournalConfig::default())
        .await
        .expect("failed to open store");
    assert_eq!(store.size(), 3);

    let history = store.get_by_request_id("req-1").await;
    let stages: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        stages,
        vec!["tool:proposed", "tool:validated", "tool:executed"]
    );

    // The chain continues from the persisted tip.
    store
        .append("req-2", stage::PROPOSED, &json!({}), None)
        .await
        .expect("failed to append after restart");
    let latest = store.get_recent(1).await;
    assert_eq!(latest[0].prev_hash, tip);
    assert_eq!(store.verify_chain().await.expect("chain should verify").verified, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_writers_on_one_database_keep_a_linear_chain() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let pool = file_pool(&dir, 4);

    // Two independent stores stand in for two processes: they share no
    // in-memory lock, only the database.
    let first = Arc::new(EventStore::new(
        Arc::new(SqliteAdapter::new(pool.clone())),
        JournalConfig::default(),
    ));
    let second = Arc::new(EventStore::new(
        Arc::new(SqliteAdapter::new(pool)),
        JournalConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = if i % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        handles.push(tokio::spawn(async move {
            store
                .append(&format!("req-{i}"), stage::EXECUTED, &json!({"i": i}), None)
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .expect("task panicked")
            .expect("failed to append");
    }

    assert_eq!(first.size() + second.size(), 20);
    let report = first.verify_chain().await.expect("chain should stay linear");
    assert_eq!(report.verified, 20);
    assert_eq!(report.unchained, 0);
}
