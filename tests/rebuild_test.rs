//! End-to-end rebuild scenarios against a real PostgreSQL instance.

mod common;

use common::TestDb;
use pg_rebuild_table::config::RebuildConfig;
use pg_rebuild_table::session::SqlExecutor;

fn config(table: &str) -> RebuildConfig {
    RebuildConfig {
        schema_name: "public".to_string(),
        table_name: table.to_string(),
        additional_condition: None,
        make_backup: false,
        clean: false,
        only_switch: false,
        only_validate_constraints: false,
        chunk_limit: Some(2),
        statement_timeout_ms: 900_000,
        lock_timeout: "2s".to_string(),
        reorder_columns: false,
        set_column_order: None,
        set_data_type: None,
    }
}

#[tokio::test]
async fn rebuild_preserves_rows_and_swaps_into_place() {
    let mut db = TestDb::new().await;

    db.batch_execute(
        "create table public.orders (id bigint primary key, amount bigint not null, note text);
         insert into public.orders select g, g * 10, 'row ' || g from generate_series(1, 9) g;",
    )
    .await;

    let cfg = config("orders");
    pg_rebuild_table::engine::run(&mut db.session, &cfg)
        .await
        .expect("rebuild should succeed");

    assert_eq!(db.count("public.orders").await, 9);

    let row = db
        .session
        .query_opt("select amount, note from public.orders where id = 5")
        .await
        .unwrap()
        .expect("row 5 should survive the rebuild");
    let amount: i64 = row.get("amount");
    let note: String = row.get("note");
    assert_eq!(amount, 50);
    assert_eq!(note, "row 5");
}

#[tokio::test]
async fn rebuild_captures_concurrent_writes_during_copy() {
    let mut db = TestDb::new().await;

    db.batch_execute(
        "create table public.events (id bigint primary key, payload text not null);
         insert into public.events select g, 'payload ' || g from generate_series(1, 5000) g;",
    )
    .await;

    let writer = db.second_session().await;
    let cfg = config("events");

    let rebuild = tokio::spawn(async move {
        let mut session = db.session;
        pg_rebuild_table::engine::run(&mut session, &cfg).await.expect("rebuild should succeed");
        session
    });

    writer
        .execute("insert into public.events values (5001, 'late arrival')")
        .await
        .expect("concurrent insert should be captured by the trigger");

    let session = rebuild.await.expect("rebuild task panicked");

    let row = session
        .query_opt("select payload from public.events where id = 5001")
        .await
        .unwrap()
        .expect("concurrently-inserted row should be present after swap");
    let payload: String = row.get("payload");
    assert_eq!(payload, "late arrival");
}

#[tokio::test]
async fn clean_drops_shadow_and_delta_without_swapping() {
    let mut db = TestDb::new().await;

    db.batch_execute("create table public.widgets (id bigint primary key, name text not null);").await;

    let mut cfg = config("widgets");
    // Nothing has been built yet, so --clean should just no-op cleanly.
    cfg.clean = true;

    pg_rebuild_table::engine::run(&mut db.session, &cfg).await.expect("clean should succeed even with nothing to clean");

    let exists = db
        .session
        .query_opt("select 1 as one from pg_tables where schemaname = 'public' and tablename = 'widgets__new'")
        .await
        .unwrap();
    assert!(exists.is_none());
}
