//! Broker-agnostic traits used by the rest of the workspace.
//!
//! The engine never talks to a venue directly; it goes through
//! [`BrokerSession`], which a connector implements. Asynchronous venue
//! activity (fills, disconnects) flows back through a [`BrokerEvent`]
//! channel owned by the runtime.

use async_trait::async_trait;
use gridline_core::{
    ContractId, Execution, InstrumentSpec, Price, Quantity, Side,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by broker implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failures (socket drops, timeouts).
    #[error("transport error: {0}")]
    Transport(String),
    /// The venue refused the connection or the client id is in use.
    #[error("connection refused: {0}")]
    Connection(String),
    /// The request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The venue rejected the order at the business level.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// The contract query matched nothing.
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// Time-in-force for submitted orders.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TimeInForce {
    Day,
    GoodTillCanceled,
}

/// Venue-level flags applied to every submitted order.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderFlags {
    /// Allow resting outside regular trading hours.
    pub outside_rth: bool,
    pub tif: TimeInForce,
}

impl Default for OrderFlags {
    fn default() -> Self {
        Self {
            outside_rth: true,
            tif: TimeInForce::GoodTillCanceled,
        }
    }
}

/// Venue-assigned handle for an open order, used for cancellation.
pub type OrderHandle = i64;

/// A limit order to be placed on the venue.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LimitOrder {
    /// Packed reference string produced by the identifier codec.
    pub reference: String,
    pub contract_id: ContractId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub flags: OrderFlags,
}

/// An order currently resting on the venue's book.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenOrder {
    pub handle: OrderHandle,
    pub reference: String,
    pub contract_id: ContractId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub remaining: Quantity,
}

/// Asynchronous notifications delivered by a connector.
#[derive(Clone, Debug)]
pub enum BrokerEvent {
    /// A full or partial fill on one of our orders.
    Execution(Execution),
    /// The session lost its link to the venue.
    Disconnected,
}

/// Sender half handed to connectors so they can push [`BrokerEvent`]s.
pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;

/// A live session against one venue.
///
/// Implementations are expected to be cheap to call repeatedly;
/// `is_connected` in particular is polled every cycle.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Establish (or re-establish) the link to the venue.
    async fn connect(&self) -> BrokerResult<()>;

    /// Whether the link is currently healthy.
    async fn is_connected(&self) -> bool;

    /// Resolve an instrument description to a venue contract id.
    ///
    /// `Ok(None)` means the venue knows no such instrument.
    async fn resolve_contract(&self, spec: &InstrumentSpec) -> BrokerResult<Option<ContractId>>;

    /// Place a limit order; returns the venue handle on acceptance.
    async fn submit_limit_order(&self, order: LimitOrder) -> BrokerResult<OrderHandle>;

    /// Request cancellation of a resting order. Completion is observed
    /// through [`BrokerSession::list_open_orders`], not through this call.
    async fn cancel_order(&self, handle: OrderHandle) -> BrokerResult<()>;

    /// Snapshot of every order our client currently has on the book.
    async fn list_open_orders(&self) -> BrokerResult<Vec<OpenOrder>>;

    /// Last traded (or midpoint) price for the contract.
    async fn fetch_market_price(&self, contract_id: ContractId) -> BrokerResult<Price>;
}

/// Rows of strategy parameters, re-read every cycle.
#[async_trait]
pub trait StrategySource: Send + Sync {
    async fn fetch_rows(&self) -> anyhow::Result<Vec<gridline_core::RawStrategyRow>>;
}

/// Outbound operator alerts (fills, disconnects, rejections).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Notifier that drops every message; used in tests and when alerting
/// is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str) {}
}
