// End-to-end session flows across stores and engine instances

use std::sync::Arc;
use std::time::Duration;

use masters_calc::{
    spawn_watch, ClientBlobStore, FixedClock, RosterState, SessionEngine, SessionError,
    SqliteStore, StateStore, Update,
};
use tokio::sync::{mpsc, watch};

fn engine_over(store: Arc<dyn StateStore>) -> SessionEngine {
    SessionEngine::with_clock(store, Arc::new(FixedClock::year(2025)))
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Update>) -> Update {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("update should arrive")
        .expect("channel should be open")
}

#[tokio::test]
async fn test_two_engines_share_sqlite_store() {
    let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(3600)).unwrap());
    let writer = engine_over(store.clone());
    let watcher = engine_over(store.clone());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut rx = spawn_watch(watcher, "crew".into(), shutdown_rx);
    assert_eq!(next(&mut rx).await, Update::Rowers(vec![]));
    next(&mut rx).await;

    while store.subscriber_count("crew") == 0 {
        tokio::task::yield_now().await;
    }

    writer.create("crew", "Alice", "1988").await.unwrap();
    writer.create("crew", "Carol", "52").await.unwrap();
    writer.delete("crew", 0).await.unwrap();

    let mut rosters = Vec::new();
    for _ in 0..3 {
        match next(&mut rx).await {
            Update::Rowers(rowers) => rosters.push(rowers),
            other => panic!("expected rowers, got {:?}", other),
        }
        assert!(matches!(next(&mut rx).await, Update::Signals(_)));
    }

    let names: Vec<Vec<&str>> = rosters
        .iter()
        .map(|r| r.iter().map(|rower| rower.name.as_str()).collect())
        .collect();
    assert_eq!(names, vec![vec!["Alice"], vec!["Alice", "Carol"], vec!["Carol"]]);

    println!("✅ Shared store watch test PASSED");
}

#[tokio::test]
async fn test_client_held_roster_round_trips_between_requests() {
    // Request 1: no cookie yet
    let first = Arc::new(ClientBlobStore::from_cookie(None));
    engine_over(first.clone())
        .create("ignored", "Alice", "1988")
        .await
        .unwrap();
    let cookie = first.cookie_value().expect("roster cookie");

    // Request 2: browser sends the cookie back
    let second = Arc::new(ClientBlobStore::from_cookie(Some(&cookie)));
    let engine = engine_over(second.clone());
    engine.create("ignored", "Carol", "52").await.unwrap();

    let state: RosterState = engine.snapshot("ignored").await.unwrap();
    assert_eq!(state.rowers.len(), 2);
    assert_eq!(state.rowers[1].category, "D");
    assert_eq!(state.signals.average_age, "44.5");
    assert_eq!(state.signals.average_category, "C");
}

#[tokio::test]
async fn test_failed_mutations_leave_store_untouched() {
    let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(3600)).unwrap());
    let engine = engine_over(store.clone());
    engine.create("crew", "Alice", "1988").await.unwrap();
    let before = store.get("crew").await.unwrap();

    assert!(matches!(
        engine.create("crew", "Bob", "26").await,
        Err(SessionError::TooYoung { .. })
    ));
    assert!(matches!(
        engine.create("crew", "Bob", "twenty").await,
        Err(SessionError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.delete("crew", 5).await,
        Err(SessionError::IndexOutOfRange { index: 5, len: 1 })
    ));

    assert_eq!(store.get("crew").await.unwrap(), before);
}

#[tokio::test]
async fn test_expired_session_reads_empty() {
    let store = Arc::new(SqliteStore::open_in_memory(Duration::ZERO).unwrap());
    let engine = engine_over(store);
    engine.create("crew", "Alice", "1988").await.unwrap();

    let state = engine.snapshot("crew").await.unwrap();
    assert!(state.rowers.is_empty());
}
