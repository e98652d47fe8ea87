//! Disconnect handling and full recovery after a prolonged outage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridline_broker::StrategySource;
use gridline_cli::{run_live_with_shutdown, LiveSettings, ShutdownSignal};
use gridline_core::RawStrategyRow;
use gridline_paper::PaperSession;
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct FixedSource {
    rows: Mutex<Vec<RawStrategyRow>>,
}

#[async_trait]
impl StrategySource for FixedSource {
    async fn fetch_rows(&self) -> anyhow::Result<Vec<RawStrategyRow>> {
        Ok(self.rows.lock().clone())
    }
}

fn row(strategy_id: i64) -> RawStrategyRow {
    let mut row = RawStrategyRow::new();
    row.set("strategy_id", strategy_id.to_string())
        .set("mode", "STOCK")
        .set("symbol", "ACME")
        .set("exchange", "SMART")
        .set("currency", "USD")
        .set("active", "true")
        .set("initial_price", "100")
        .set("order_quantity", "1")
        .set("step", "5")
        .set("buy_levels", "2")
        .set("sell_levels", "1")
        .set("max_long_risk", "0")
        .set("max_short_risk", "0");
    row
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn prolonged_outage_replants_every_grid() {
    let session = Arc::new(PaperSession::new());
    session.set_connected(true);
    session.register_contract("ACME", 7);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    session.set_event_sender(event_tx);

    let source = Arc::new(FixedSource {
        rows: Mutex::new(vec![row(1)]),
    });
    let shutdown = ShutdownSignal::manual();
    let heartbeat_dir = tempfile::tempdir().unwrap();
    let settings = LiveSettings {
        client_id: 19,
        cycle: Duration::from_millis(50),
        cancel_wait: Duration::from_millis(500),
        // Two failed attempts at 600ms stretch the outage past the
        // zero-second recovery threshold.
        reconnect_interval: Duration::from_millis(600),
        max_connection_loss: Duration::ZERO,
        heartbeat_path: heartbeat_dir.path().join("heartbeat.txt"),
    };

    let runtime = tokio::spawn(run_live_with_shutdown(
        session.clone(),
        source,
        Arc::new(gridline_broker::NoopNotifier),
        event_rx,
        settings,
        shutdown.clone(),
    ));

    wait_until(|| session.open_orders().len() == 3).await;
    let planted = session.submitted().len();
    assert_eq!(planted, 3);

    // The gateway goes away long enough to distrust the resting book.
    session.fail_next_connects(2);
    session.drop_link();

    // Full recovery: the old ladder is cancelled and a fresh one planted.
    wait_until(|| session.submitted().len() == planted + 3).await;
    wait_until(|| session.open_orders().len() == 3).await;

    shutdown.trigger();
    runtime.await.unwrap().unwrap();
}

#[tokio::test]
async fn short_outage_keeps_the_existing_ladder() {
    let session = Arc::new(PaperSession::new());
    session.set_connected(true);
    session.register_contract("ACME", 7);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    session.set_event_sender(event_tx);

    let source = Arc::new(FixedSource {
        rows: Mutex::new(vec![row(1)]),
    });
    let shutdown = ShutdownSignal::manual();
    let heartbeat_dir = tempfile::tempdir().unwrap();
    let settings = LiveSettings {
        client_id: 19,
        cycle: Duration::from_millis(50),
        cancel_wait: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(20),
        max_connection_loss: Duration::from_secs(3600),
        heartbeat_path: heartbeat_dir.path().join("heartbeat.txt"),
    };

    let runtime = tokio::spawn(run_live_with_shutdown(
        session.clone(),
        source,
        Arc::new(gridline_broker::NoopNotifier),
        event_rx,
        settings,
        shutdown.clone(),
    ));

    wait_until(|| session.open_orders().len() == 3).await;

    session.drop_link();
    // Reconnects quickly; the ladder is left untouched.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.open_orders().len(), 3);
    assert_eq!(session.submitted().len(), 3);

    shutdown.trigger();
    runtime.await.unwrap().unwrap();
}
