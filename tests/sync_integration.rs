use std::sync::Arc;

use mt5_statement_sync::{
    JournalStore, MemoryStore, RawStatement, Statement, StoreError, StoreOutcome, Ticket,
    TradeStore, dispatch, reconcile, sync_stores,
};

fn load_fixture(name: &str) -> Statement {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    let raw = RawStatement::from_path(path).expect("read fixture");
    Statement::parse(&raw).expect("parse fixture")
}

#[tokio::test]
async fn new_trade_is_created_in_empty_store() {
    let statement = load_fixture("single_closed_trade.html");
    let store = MemoryStore::new("memory");

    let snapshot = store.query_known_tickets().await.unwrap();
    let decision = reconcile(&statement.trades, &snapshot);
    let created: Vec<_> = decision.to_create.iter().map(|t| t.ticket.clone()).collect();
    assert_eq!(created, vec![Ticket::from("1001")]);

    let summary = dispatch(&decision, &store).await;
    assert_eq!((summary.created, summary.skipped), (1, 0));
    assert!(summary.failed.is_empty());
}

#[tokio::test]
async fn known_trade_is_skipped() {
    let statement = load_fixture("single_closed_trade.html");
    let store = MemoryStore::new("memory").with_records(statement.trades.clone());

    let snapshot = store.query_known_tickets().await.unwrap();
    let decision = reconcile(&statement.trades, &snapshot);
    assert!(decision.to_create.is_empty());
    assert!(decision.mismatches.is_empty());

    let summary = dispatch(&decision, &store).await;
    assert_eq!((summary.created, summary.skipped), (0, 1));
    assert!(summary.failed.is_empty());
}

#[tokio::test]
async fn repeated_sync_is_idempotent_across_stores() {
    let statement = load_fixture("ReportHistory-5001234.html");
    let journal_path =
        std::env::temp_dir().join(format!("sync-journal-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&journal_path);

    let memory = Arc::new(MemoryStore::new("memory"));
    let stores: Vec<Arc<dyn TradeStore>> = vec![
        memory.clone(),
        Arc::new(JournalStore::new(&journal_path)),
    ];

    let first = sync_stores(&statement, &stores).await;
    assert_eq!(first.created(), 6);
    assert_eq!(first.rows_dropped, 1);
    assert_eq!(first.open_positions, 1);
    assert!(!first.has_errors());

    let second = sync_stores(&statement, &stores).await;
    assert_eq!(second.created(), 0);
    assert_eq!(second.skipped(), 6);
    assert_eq!(memory.len().await, 3);

    std::fs::remove_file(&journal_path).unwrap();
}

#[tokio::test]
async fn failed_write_is_retried_by_next_run() {
    let statement = load_fixture("ReportHistory-5001234.html");
    let flaky: Arc<dyn TradeStore> = Arc::new(
        MemoryStore::new("flaky")
            .with_write_failure(Ticket::from("1002"), StoreError::transient("HTTP 503")),
    );

    let report = sync_stores(&statement, &[flaky]).await;
    let StoreOutcome::Synced { summary, .. } = &report.stores[0].outcome else {
        panic!("store should be reachable");
    };
    assert_eq!(summary.created, 2);
    let failed: Vec<_> = summary.failed_tickets().collect();
    assert_eq!(failed, vec![&Ticket::from("1002")]);
    assert!(report.to_string().contains("failed 1002"));
}

#[tokio::test]
async fn position_is_recorded_once_it_closes() {
    let dir = std::env::temp_dir().join(format!("sync-open-close-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let open_csv = dir.join("open.csv");
    let closed_csv = dir.join("closed.csv");
    std::fs::write(
        &open_csv,
        "Open Positions\n\
         Ticket,Symbol,Type,Volume,Open Time,Profit\n\
         3001,XAUUSD,sell,0.01,2024.03.07 15:20:00,-60.00\n",
    )
    .unwrap();
    std::fs::write(
        &closed_csv,
        "Closed Trades\n\
         Ticket,Symbol,Type,Volume,Open Time,Close Time,Profit\n\
         3001,XAUUSD,sell,0.01,2024.03.07 15:20:00,2024.03.08 10:00:00,45.00\n",
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new("memory"));
    let stores = vec![Arc::clone(&store) as Arc<dyn TradeStore>];

    let open = Statement::parse(&RawStatement::from_path(&open_csv).unwrap()).unwrap();
    let first = sync_stores(&open, &stores).await;
    assert_eq!(first.created(), 0);
    assert_eq!(first.open_positions, 1);

    let closed = Statement::parse(&RawStatement::from_path(&closed_csv).unwrap()).unwrap();
    let second = sync_stores(&closed, &stores).await;
    assert_eq!(second.created(), 1);
    assert_eq!(second.mismatches(), 0);

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].close_time.is_some());
    assert_eq!(records[0].profit.to_string(), "45.00");

    std::fs::remove_dir_all(&dir).unwrap();
}
