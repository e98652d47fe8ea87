//! Broker connection supervision.
//!
//! Owns the process-wide [`ConnectionState`] and the reconnect loop.
//! Reconnection never gives up; a prolonged outage additionally signals
//! the runtime to run a full order recovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridline_broker::BrokerSession;
use gridline_core::ConnectionState;
use tracing::{info, warn};

/// Outcome of one supervision pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recovery {
    /// The link was already healthy.
    None,
    /// The link was re-established. `full_recovery` is set when the
    /// outage exceeded the configured threshold, meaning resting orders
    /// can no longer be trusted and every grid must be re-planted.
    Reconnected { full_recovery: bool },
}

pub struct ConnectionSupervisor {
    session: Arc<dyn BrokerSession>,
    state: ConnectionState,
    /// Whether an established link has since been lost. Distinguishes a
    /// genuine outage from the initial not-yet-connected state.
    link_was_lost: bool,
    /// Fixed pause between reconnection attempts.
    reconnect_interval: Duration,
    /// Outages longer than this trigger a full recovery.
    max_connection_loss: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        session: Arc<dyn BrokerSession>,
        reconnect_interval: Duration,
        max_connection_loss: Duration,
    ) -> Self {
        Self {
            session,
            state: ConnectionState::new(Utc::now()),
            link_was_lost: false,
            reconnect_interval,
            max_connection_loss,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Record a disconnect event observed at `when`. The outage clock
    /// starts at the first disconnect and is not reset by repeated
    /// events while the link stays down.
    pub fn mark_disconnected(&mut self, when: DateTime<Utc>) {
        if self.state.connected {
            warn!("broker link lost");
            self.link_was_lost = true;
        }
        self.state.connected = false;
        if self.state.disconnected_since.is_none() {
            self.state.disconnected_since = Some(when);
        }
    }

    /// Make sure the session is live before the cycle proceeds.
    ///
    /// While disconnected this retries indefinitely with a fixed pause,
    /// so the call only returns once the link is up.
    pub async fn ensure_connected(&mut self) -> Recovery {
        if self.session.is_connected().await {
            if !self.state.connected {
                // A connector that re-established the link on its own
                // still went through an outage worth classifying.
                if self.link_was_lost {
                    return self.note_restored(Utc::now());
                }
                self.state.last_connected_at = Utc::now();
            }
            self.state.connected = true;
            self.state.disconnected_since = None;
            return Recovery::None;
        }

        self.mark_disconnected(Utc::now());
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            match self.session.connect().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        attempt,
                        error = %err,
                        retry_secs = self.reconnect_interval.as_secs(),
                        "reconnect attempt failed"
                    );
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }

        self.note_restored(Utc::now())
    }

    /// Stamp the state healthy again and classify the finished outage.
    fn note_restored(&mut self, now: DateTime<Utc>) -> Recovery {
        let outage = self.state.outage_seconds(now);
        let full_recovery = outage > self.max_connection_loss.as_secs() as i64;
        info!(outage_secs = outage, full_recovery, "broker link restored");

        self.state.connected = true;
        self.state.last_connected_at = now;
        self.state.disconnected_since = None;
        self.link_was_lost = false;
        Recovery::Reconnected { full_recovery }
    }
}
