//! Live reconciliation runtime.
//!
//! One task owns every moving part: the supervisor keeps the broker
//! session alive, the reconciler diffs configuration, the controller
//! applies actions, and broker events are drained between strategies so
//! a fill can never starve behind a long cycle.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use gridline_broker::{BrokerEvent, BrokerSession, Notifier, StrategySource};
use gridline_engine::{
    heartbeat, ActionOutcome, ConnectionSupervisor, OrderController, Reconciler, Recovery,
};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Everything the runtime needs beyond its collaborators.
pub struct LiveSettings {
    pub client_id: i32,
    pub cycle: Duration,
    pub cancel_wait: Duration,
    pub reconnect_interval: Duration,
    pub max_connection_loss: Duration,
    pub heartbeat_path: PathBuf,
}

pub async fn run_live(
    session: Arc<dyn BrokerSession>,
    source: Arc<dyn StrategySource>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    settings: LiveSettings,
) -> Result<()> {
    run_live_with_shutdown(session, source, notifier, events, settings, ShutdownSignal::new()).await
}

/// Variant of [`run_live`] that accepts a manually controlled shutdown signal.
pub async fn run_live_with_shutdown(
    session: Arc<dyn BrokerSession>,
    source: Arc<dyn StrategySource>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    settings: LiveSettings,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let controller = OrderController::new(
        session.clone(),
        notifier.clone(),
        settings.client_id,
        settings.cancel_wait,
    );
    let supervisor = ConnectionSupervisor::new(
        session.clone(),
        settings.reconnect_interval,
        settings.max_connection_loss,
    );
    let mut runtime = LiveRuntime {
        session,
        source,
        notifier,
        reconciler: Reconciler::new(),
        controller,
        supervisor,
        events,
        cycle: settings.cycle,
        heartbeat_path: settings.heartbeat_path,
        shutdown,
    };
    runtime.run().await
}

struct LiveRuntime {
    session: Arc<dyn BrokerSession>,
    source: Arc<dyn StrategySource>,
    notifier: Arc<dyn Notifier>,
    reconciler: Reconciler,
    controller: OrderController,
    supervisor: ConnectionSupervisor,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    cycle: Duration,
    heartbeat_path: PathBuf,
    shutdown: ShutdownSignal,
}

impl LiveRuntime {
    async fn run(&mut self) -> Result<()> {
        self.supervisor.ensure_connected().await;
        // Clean slate: orders left over from a previous run are stale.
        let cancelled = self.controller.cancel_all().await;
        if cancelled > 0 {
            info!(cancelled, "cleared orders from a previous session");
        }
        info!("live reconciliation loop started");
        self.notifier.notify("gridline started").await;

        while !self.shutdown.triggered() {
            match self.supervisor.ensure_connected().await {
                Recovery::Reconnected {
                    full_recovery: true,
                } => {
                    warn!("prolonged outage, re-planting every grid");
                    self.notifier
                        .notify("broker link restored after a long outage, full recovery running")
                        .await;
                    self.controller.cancel_all().await;
                    self.reconciler.reset();
                }
                Recovery::Reconnected {
                    full_recovery: false,
                } => {
                    self.notifier.notify("broker link restored").await;
                }
                Recovery::None => {}
            }

            let started = Instant::now();
            if let Err(err) = self.run_cycle().await {
                // The loop survives anything a cycle throws at it.
                error!(error = %err, "reconciliation cycle failed");
            }
            if let Err(err) = heartbeat::write_heartbeat(&self.heartbeat_path, Utc::now()) {
                warn!(error = %err, "heartbeat write failed");
            }
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "cycle complete");

            self.idle().await;
        }

        info!("shutdown requested, leaving resting orders in place");
        Ok(())
    }

    async fn run_cycle(&mut self) -> Result<()> {
        let rows = match self.source.fetch_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                // An unreadable sheet must not cancel every grid, so the
                // cycle is skipped rather than diffed against nothing.
                warn!(error = %err, "configuration unavailable, cycle skipped");
                return Ok(());
            }
        };

        let emitted = self.reconciler.reconcile(&rows, self.session.as_ref()).await;
        for strategy in emitted {
            // Suspension point: fills and disconnects observed so far
            // are handled before the next strategy's action.
            self.drain_events().await;
            if self.shutdown.triggered() {
                break;
            }
            let outcome = self.controller.apply_action(&strategy).await;
            if outcome == ActionOutcome::Completed {
                self.reconciler.confirm_applied(strategy.strategy_id);
            }
        }
        self.drain_events().await;
        Ok(())
    }

    async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Execution(execution) => {
                self.controller.on_execution(&execution, &self.reconciler).await;
            }
            BrokerEvent::Disconnected => {
                self.supervisor.mark_disconnected(Utc::now());
            }
        }
    }

    /// Wait out the cycle interval while still reacting to broker
    /// events and shutdown as they arrive.
    async fn idle(&mut self) {
        let deadline = tokio::time::Instant::now() + self.cycle;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => return,
                maybe_event = self.events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => return,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return,
            }
            if self.shutdown.triggered() || tokio::time::Instant::now() >= deadline {
                return;
            }
        }
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let flag_clone = flag.clone();
        let notify_clone = notify.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag_clone.store(true, Ordering::SeqCst);
                notify_clone.notify_waiters();
            }
        });
        Self { flag, notify }
    }

    /// A signal that only triggers manually, never on ctrl-c.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
