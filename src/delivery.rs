// 📡 Delivery - session watch → per-connection update messages
//
// Each connected client gets its own watch task and its own unbounded
// channel. Nothing is coalesced and a slow or dead client only affects its
// own task.

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::{DerivedSignals, RosterState, SessionEngine};
use crate::error::SessionError;
use crate::rower::Rower;

/// One outbound message for a client
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// New roster, in order
    Rowers(Vec<Rower>),
    /// New signals
    Signals(DerivedSignals),
    /// Something went wrong; shown to the user
    Alert(String),
}

/// Messages for one state: the roster first, then its signals
pub fn updates_for(state: RosterState) -> [Update; 2] {
    [Update::Rowers(state.rowers), Update::Signals(state.signals)]
}

/// Start a watch for one connection.
///
/// The task ends when the returned receiver is dropped or `shutdown`
/// turns true. A watch error is sent as an `Alert` before the task ends.
pub fn spawn_watch(
    engine: SessionEngine,
    key: String,
    shutdown: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Update> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let closer = tx.clone();
        let cancel = async move {
            tokio::select! {
                _ = closer.closed() => debug!("client disconnected"),
                _ = wait_for_shutdown(shutdown) => debug!("server shutting down"),
            }
        };

        let sender = tx.clone();
        let result = engine
            .watch(&key, cancel, move |state| {
                for update in updates_for(state) {
                    sender
                        .send(update)
                        .map_err(|_| SessionError::Delivery("client went away".to_string()))?;
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => debug!(session = %key, "watch ended"),
            Err(SessionError::Delivery(reason)) => debug!(session = %key, reason = %reason, "watch ended"),
            Err(e) => {
                warn!(session = %key, error = %e, "watch failed");
                let _ = tx.send(Update::Alert(format!("Error while watching: {}", e)));
            }
        }
    });

    rx
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone without signalling: nothing will ever shut us down
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// SERVER-SENT EVENTS (Datastar wire format)
// ============================================================================

#[cfg(feature = "server")]
pub mod sse {
    use axum::response::sse::Event;

    use super::Update;
    use crate::render::table_body;

    pub const PATCH_ELEMENTS: &str = "datastar-patch-elements";
    pub const PATCH_SIGNALS: &str = "datastar-patch-signals";

    /// Encode an update as a Datastar SSE event
    pub fn to_event(update: &Update) -> Event {
        match update {
            Update::Rowers(rowers) => Event::default()
                .event(PATCH_ELEMENTS)
                .data(prefix_lines("elements", &table_body(rowers))),
            Update::Signals(signals) => {
                let json = serde_json::to_string(signals).unwrap_or_else(|_| "{}".to_string());
                Event::default()
                    .event(PATCH_SIGNALS)
                    .data(format!("signals {}", json))
            }
            Update::Alert(message) => Event::default()
                .event(PATCH_ELEMENTS)
                .data(format!(
                    "selector body\nmode append\n{}",
                    prefix_lines("elements", &alert_script(message))
                )),
        }
    }

    fn prefix_lines(prefix: &str, text: &str) -> String {
        text.lines()
            .map(|line| format!("{} {}", prefix, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn alert_script(message: &str) -> String {
        let literal = serde_json::to_string(message).unwrap_or_else(|_| "\"\"".to_string());
        format!(
            "<script data-effect=\"el.remove()\">alert({})</script>",
            literal.replace("</", "<\\/")
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_prefix_lines() {
            assert_eq!(prefix_lines("elements", "<a>\n</a>"), "elements <a>\nelements </a>");
        }

        #[test]
        fn test_alert_script_cannot_close_tag() {
            let script = alert_script("bad </script><b>");
            assert_eq!(script.matches("</script>").count(), 1);
            assert!(script.contains("alert(\"bad <\\/script><b>\")"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rower::FixedClock;
    use crate::store::{MemoryStore, StateStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> (SessionEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let engine = SessionEngine::with_clock(store.clone(), Arc::new(FixedClock::year(2025)));
        (engine, store)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Update>) -> Update {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("update should arrive")
            .expect("channel should be open")
    }

    async fn wait_for_subscribers(store: &MemoryStore, key: &str, count: usize) {
        while store.subscriber_count(key) < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_rowers_then_signals() {
        let (engine, store) = engine();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut rx = spawn_watch(engine.clone(), "s1".into(), shutdown_rx);

        assert_eq!(next(&mut rx).await, Update::Rowers(vec![]));
        assert!(matches!(next(&mut rx).await, Update::Signals(s) if s.average_age == "0.0"));

        wait_for_subscribers(&store, "s1", 1).await;
        engine.create("s1", "Alice", "1988").await.unwrap();

        match next(&mut rx).await {
            Update::Rowers(rowers) => assert_eq!(rowers[0].name, "Alice"),
            other => panic!("expected rowers, got {:?}", other),
        }
        match next(&mut rx).await {
            Update::Signals(signals) => assert_eq!(signals.average_category, "B"),
            other => panic!("expected signals, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_leaves_sibling_running() {
        let (engine, store) = engine();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let gone = spawn_watch(engine.clone(), "s1".into(), shutdown_rx.clone());
        let mut alive = spawn_watch(engine.clone(), "s1".into(), shutdown_rx);

        wait_for_subscribers(&store, "s1", 2).await;
        drop(gone);
        while store.subscriber_count("s1") > 1 {
            tokio::task::yield_now().await;
        }

        // Skip the initial render
        next(&mut alive).await;
        next(&mut alive).await;

        engine.create("s1", "Alice", "1988").await.unwrap();
        assert!(matches!(next(&mut alive).await, Update::Rowers(r) if r.len() == 1));
        assert_eq!(store.subscriber_count("s1"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_watch() {
        let (engine, store) = engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut rx = spawn_watch(engine, "s1".into(), shutdown_rx);

        wait_for_subscribers(&store, "s1", 1).await;
        shutdown_tx.send(true).unwrap();

        // Drain the initial render, then the channel closes
        next(&mut rx).await;
        next(&mut rx).await;
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_write_sends_alert() {
        let (engine, store) = engine();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut rx = spawn_watch(engine, "s1".into(), shutdown_rx);

        next(&mut rx).await;
        next(&mut rx).await;
        wait_for_subscribers(&store, "s1", 1).await;

        store.put("s1", b"garbage".to_vec()).await.unwrap();
        match next(&mut rx).await {
            Update::Alert(message) => assert!(message.contains("could not decode")),
            other => panic!("expected alert, got {:?}", other),
        }
    }
}
