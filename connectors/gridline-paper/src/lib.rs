//! Scriptable in-memory broker session.
//!
//! Implements [`BrokerSession`] against a mutable in-process book so the
//! engine and runtime can be exercised without a gateway. Tests script
//! the venue through the helper methods: seed contracts and prices,
//! drop the link, make connects fail, fill resting orders.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gridline_broker::{
    BrokerError, BrokerEvent, BrokerResult, BrokerSession, EventSender, LimitOrder, OpenOrder,
    OrderHandle,
};
use gridline_core::{ContractId, Execution, InstrumentSpec, Price, Quantity};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Default)]
struct Inner {
    connected: bool,
    /// Pending connect attempts that must fail before one succeeds.
    failing_connects: u32,
    next_handle: OrderHandle,
    contracts: HashMap<String, ContractId>,
    prices: HashMap<ContractId, Price>,
    book: Vec<OpenOrder>,
    /// Every order ever accepted, in submission order.
    submitted: Vec<LimitOrder>,
    /// Handles whose cancel requests are silently ignored.
    stuck_handles: Vec<OrderHandle>,
    events: Option<EventSender>,
}

/// In-memory venue with a scriptable book.
#[derive(Clone, Default)]
pub struct PaperSession {
    inner: Arc<Mutex<Inner>>,
}

impl PaperSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route asynchronous venue activity into the runtime's channel.
    pub fn set_event_sender(&self, sender: EventSender) {
        self.inner.lock().events = Some(sender);
    }

    /// Make an instrument symbol resolvable.
    pub fn register_contract(&self, symbol: &str, contract_id: ContractId) {
        self.inner.lock().contracts.insert(symbol.to_string(), contract_id);
    }

    pub fn set_market_price(&self, contract_id: ContractId, price: Price) {
        self.inner.lock().prices.insert(contract_id, price);
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().connected = connected;
    }

    /// The next `attempts` calls to `connect` will fail.
    pub fn fail_next_connects(&self, attempts: u32) {
        self.inner.lock().failing_connects = attempts;
    }

    /// Ignore cancel requests for this handle, simulating a venue that
    /// never confirms the cancellation.
    pub fn stick_cancel(&self, handle: OrderHandle) {
        self.inner.lock().stuck_handles.push(handle);
    }

    /// Honor cancel requests for this handle again.
    pub fn release_cancel(&self, handle: OrderHandle) {
        self.inner.lock().stuck_handles.retain(|stuck| *stuck != handle);
    }

    /// Drop the link and notify the runtime, as a gateway restart would.
    pub fn drop_link(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        if let Some(events) = &inner.events {
            let _ = events.send(BrokerEvent::Disconnected);
        }
    }

    /// Completely fill the resting order with the given reference,
    /// removing it from the book and emitting the execution event.
    pub fn fill_order(&self, reference: &str) {
        let mut inner = self.inner.lock();
        let Some(index) = inner.book.iter().position(|o| o.reference == reference) else {
            panic!("no open order with reference {reference}");
        };
        let order = inner.book.remove(index);
        let execution = Execution {
            order_ref: order.reference,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            remaining: Decimal::ZERO,
            timestamp: Utc::now(),
        };
        if let Some(events) = &inner.events {
            let _ = events.send(BrokerEvent::Execution(execution));
        }
    }

    /// Snapshot of the resting book.
    #[must_use]
    pub fn open_orders(&self) -> Vec<OpenOrder> {
        self.inner.lock().book.clone()
    }

    /// Every order accepted so far, oldest first.
    #[must_use]
    pub fn submitted(&self) -> Vec<LimitOrder> {
        self.inner.lock().submitted.clone()
    }
}

#[async_trait]
impl BrokerSession for PaperSession {
    async fn connect(&self) -> BrokerResult<()> {
        let mut inner = self.inner.lock();
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(BrokerError::Connection("gateway unreachable".into()));
        }
        inner.connected = true;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    async fn resolve_contract(&self, spec: &InstrumentSpec) -> BrokerResult<Option<ContractId>> {
        let inner = self.inner.lock();
        if !inner.connected {
            return Err(BrokerError::Transport("not connected".into()));
        }
        Ok(inner.contracts.get(&spec.symbol).copied())
    }

    async fn submit_limit_order(&self, order: LimitOrder) -> BrokerResult<OrderHandle> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(BrokerError::Transport("not connected".into()));
        }
        if order.quantity <= Quantity::ZERO {
            return Err(BrokerError::Rejected("non-positive quantity".into()));
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.book.push(OpenOrder {
            handle,
            reference: order.reference.clone(),
            contract_id: order.contract_id,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            remaining: order.quantity,
        });
        inner.submitted.push(order);
        debug!(handle, "paper order accepted");
        Ok(handle)
    }

    async fn cancel_order(&self, handle: OrderHandle) -> BrokerResult<()> {
        let mut inner = self.inner.lock();
        if inner.stuck_handles.contains(&handle) {
            return Ok(());
        }
        inner.book.retain(|order| order.handle != handle);
        Ok(())
    }

    async fn list_open_orders(&self) -> BrokerResult<Vec<OpenOrder>> {
        Ok(self.inner.lock().book.clone())
    }

    async fn fetch_market_price(&self, contract_id: ContractId) -> BrokerResult<Price> {
        self.inner
            .lock()
            .prices
            .get(&contract_id)
            .copied()
            .ok_or_else(|| BrokerError::Other(format!("no market price for contract {contract_id}")))
    }
}
