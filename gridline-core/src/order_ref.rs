//! Order reference codec.
//!
//! The broker exposes a single flat reference string per order, so every
//! field needed to trace an order back to its owner is packed into that
//! string: client id, strategy id, side, and a monotonic sequence number.
//! The sequence is derived from wall-clock milliseconds, which keeps it
//! globally unique across restarts and lets an operator recover the
//! approximate submission time by dividing by 1000.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ClientId, Side, StrategyId};

/// Leading tag that separates our references from user-entered ones.
const PREFIX: &str = "GRD";
const DELIMITER: char = ':';

/// Decoded form of a reference string produced by [`OrderRefCodec`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OrderRef {
    pub client_id: ClientId,
    pub strategy_id: StrategyId,
    pub side: Side,
    /// Strictly increasing, wall-clock-derived (milliseconds since epoch).
    pub sequence: i64,
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            Side::Buy => 'B',
            Side::Sell => 'S',
        };
        write!(
            f,
            "{PREFIX}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{side}{DELIMITER}{}",
            self.client_id, self.strategy_id, self.sequence
        )
    }
}

/// The reference string was not produced by this codec.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("reference string is not ours")]
pub struct NotMine;

impl FromStr for OrderRef {
    type Err = NotMine;

    /// Strict parse of the packed form; anything else is "not mine".
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().split(DELIMITER);
        if parts.next() != Some(PREFIX) {
            return Err(NotMine);
        }
        let client_id = parts.next().and_then(|p| p.parse().ok()).ok_or(NotMine)?;
        let strategy_id = parts.next().and_then(|p| p.parse().ok()).ok_or(NotMine)?;
        let side = match parts.next() {
            Some("B") => Side::Buy,
            Some("S") => Side::Sell,
            _ => return Err(NotMine),
        };
        let sequence = parts.next().and_then(|p| p.parse().ok()).ok_or(NotMine)?;
        if parts.next().is_some() {
            return Err(NotMine);
        }
        Ok(Self {
            client_id,
            strategy_id,
            side,
            sequence,
        })
    }
}

/// Allocates reference strings for one client session.
///
/// The codec is the only producer of sequence numbers; two encodes in the
/// same millisecond still yield distinct, ordered values.
#[derive(Debug)]
pub struct OrderRefCodec {
    client_id: ClientId,
    last_sequence: AtomicI64,
}

impl OrderRefCodec {
    #[must_use]
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            last_sequence: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Build the reference string for a new order.
    pub fn encode(&self, strategy_id: StrategyId, side: Side) -> String {
        let sequence = self.next_sequence();
        OrderRef {
            client_id: self.client_id,
            strategy_id,
            side,
            sequence,
        }
        .to_string()
    }

    /// Total decode: malformed and foreign-origin strings yield `None`.
    #[must_use]
    pub fn decode(reference: &str) -> Option<OrderRef> {
        reference.parse().ok()
    }

    /// Whether the reference was produced by this client session.
    #[must_use]
    pub fn belongs_to_client(&self, reference: &str) -> bool {
        Self::decode(reference).is_some_and(|r| r.client_id == self.client_id)
    }

    /// Whether the reference belongs to the given strategy of this client.
    #[must_use]
    pub fn belongs_to_strategy(&self, reference: &str, strategy_id: StrategyId) -> bool {
        Self::decode(reference)
            .is_some_and(|r| r.client_id == self.client_id && r.strategy_id == strategy_id)
    }

    fn next_sequence(&self) -> i64 {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.last_sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_millis.max(last + 1))
            })
            .map(|last| now_millis.max(last + 1))
            .unwrap_or(now_millis)
    }
}
