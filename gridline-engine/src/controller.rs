//! Order lifecycle controller.
//!
//! Executes the action each reconciled strategy carries: plants grids
//! for `New`/`Start`, cancels for `Stop`/`Deleted`, and reacts to
//! completed fills with the single counter-order that keeps the ladder
//! intact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gridline_broker::{BrokerSession, LimitOrder, Notifier, OrderFlags};
use gridline_core::{
    ContractId, Execution, OrderRefCodec, Price, Quantity, StrategyAction, StrategyConfig,
    StrategyId,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::planner::{self, PlannedOrder};
use crate::reconciler::Reconciler;
use crate::risk::RiskGate;

/// Pause between polls while waiting for a cancellation to clear.
const CANCEL_POLL: Duration = Duration::from_secs(1);

/// Result of applying one lifecycle action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionOutcome {
    /// The action ran to completion; the reconciler may confirm it.
    Completed,
    /// The action could not fully apply this cycle (unresolved contract
    /// or price, or orders still resting after a cancel) and must be
    /// retried next cycle.
    Postponed,
}

/// Result of one cancellation sweep.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CancelOutcome {
    /// Orders confirmed gone from the book.
    pub cancelled: usize,
    /// Whether no matching orders remain resting.
    pub clean: bool,
}

pub struct OrderController {
    session: Arc<dyn BrokerSession>,
    notifier: Arc<dyn Notifier>,
    codec: OrderRefCodec,
    risk: RiskGate,
    /// Contract each strategy last posted through, so a fill arriving
    /// after the strategy is gone can still be booked.
    contracts: HashMap<StrategyId, ContractId>,
    /// Upper bound on waiting for cancelled orders to leave the book.
    cancel_wait: Duration,
}

impl OrderController {
    pub fn new(
        session: Arc<dyn BrokerSession>,
        notifier: Arc<dyn Notifier>,
        client_id: i32,
        cancel_wait: Duration,
    ) -> Self {
        Self {
            session,
            notifier,
            codec: OrderRefCodec::new(client_id),
            risk: RiskGate::new(),
            contracts: HashMap::new(),
            cancel_wait,
        }
    }

    /// Apply one strategy's lifecycle action for this cycle.
    pub async fn apply_action(&mut self, config: &StrategyConfig) -> ActionOutcome {
        match config.action {
            StrategyAction::New | StrategyAction::Start => self.post_grid(config).await,
            StrategyAction::Stop | StrategyAction::Deleted => {
                let outcome = self.cancel_strategy_orders(config.strategy_id).await;
                info!(
                    strategy = config.strategy_id,
                    action = ?config.action,
                    cancelled = outcome.cancelled,
                    "strategy wound down"
                );
                if outcome.clean {
                    ActionOutcome::Completed
                } else {
                    warn!(
                        strategy = config.strategy_id,
                        "orders still resting, wind-down repeated next cycle"
                    );
                    ActionOutcome::Postponed
                }
            }
            StrategyAction::Continue => ActionOutcome::Completed,
        }
    }

    /// Plant the full ladder for a freshly launched strategy.
    async fn post_grid(&mut self, config: &StrategyConfig) -> ActionOutcome {
        let Some(contract_id) = config.contract_id else {
            warn!(
                strategy = config.strategy_id,
                "contract not yet resolved, grid postponed to next cycle"
            );
            return ActionOutcome::Postponed;
        };
        let Some(reference_price) = self.resolve_price(config, contract_id).await else {
            return ActionOutcome::Postponed;
        };

        let ladder = planner::initial_ladder(config, reference_price);
        info!(
            strategy = config.strategy_id,
            %reference_price,
            levels = ladder.len(),
            "planting grid"
        );
        for planned in ladder {
            // A refused or rejected level never aborts its siblings.
            self.post_order(config, contract_id, planned).await;
        }
        ActionOutcome::Completed
    }

    /// Submit one planned order, subject to the risk gate.
    async fn post_order(&mut self, config: &StrategyConfig, contract_id: ContractId, planned: PlannedOrder) {
        self.contracts.insert(config.strategy_id, contract_id);
        if !self.risk.authorize(
            config,
            contract_id,
            planned.side,
            config.order_quantity,
            planned.price,
        ) {
            return;
        }
        let reference = self.codec.encode(config.strategy_id, planned.side);
        let order = LimitOrder {
            reference: reference.clone(),
            contract_id,
            side: planned.side,
            price: planned.price,
            quantity: config.order_quantity,
            flags: OrderFlags::default(),
        };
        match self.session.submit_limit_order(order).await {
            Ok(handle) => {
                debug!(
                    strategy = config.strategy_id,
                    side = %planned.side,
                    price = %planned.price,
                    handle,
                    %reference,
                    "order submitted"
                );
            }
            Err(err) => {
                warn!(
                    strategy = config.strategy_id,
                    side = %planned.side,
                    price = %planned.price,
                    error = %err,
                    "order submission failed"
                );
                self.notifier
                    .notify(&format!(
                        "order rejected for strategy {}: {err}",
                        config.strategy_id
                    ))
                    .await;
            }
        }
    }

    /// Handle a broker execution event.
    ///
    /// Partial fills are ignored; a completed fill updates the position
    /// book and, if the strategy is still running, posts the reactive
    /// counter-order one step away from the fill price.
    pub async fn on_execution(&mut self, execution: &Execution, reconciler: &Reconciler) {
        if !execution.is_complete() {
            return;
        }
        let Some(decoded) = OrderRefCodec::decode(&execution.order_ref) else {
            debug!(reference = %execution.order_ref, "fill on a foreign order, ignored");
            return;
        };
        if decoded.client_id != self.codec.client_id() {
            debug!(reference = %execution.order_ref, "fill for another client, ignored");
            return;
        }

        let strategy = reconciler.get(decoded.strategy_id);
        // The position books even when the strategy entry is already
        // gone; the contract is remembered from submission.
        let contract = strategy
            .and_then(|s| s.contract_id)
            .or_else(|| self.contracts.get(&decoded.strategy_id).copied());
        if let Some(contract_id) = contract {
            self.risk
                .record_execution(contract_id, execution.side, execution.quantity);
        }

        let Some(config) = strategy else {
            debug!(strategy = decoded.strategy_id, "fill for an unknown strategy, discarded");
            return;
        };
        if !config.active
            || matches!(config.action, StrategyAction::Stop | StrategyAction::Deleted)
        {
            debug!(
                strategy = config.strategy_id,
                action = ?config.action,
                "fill for a winding-down strategy, no reaction"
            );
            return;
        }
        let Some(contract_id) = config.contract_id else {
            return;
        };

        let reaction = planner::reactive_order(execution.side, execution.price, config.step);
        info!(
            strategy = config.strategy_id,
            filled = %execution.side,
            fill_price = %execution.price,
            reaction = %reaction.side,
            reaction_price = %reaction.price,
            "reacting to fill"
        );
        self.notifier
            .notify(&format!(
                "strategy {}: {} filled at {}",
                config.strategy_id, execution.side, execution.price
            ))
            .await;
        self.post_order(config, contract_id, reaction).await;
    }

    /// Net signed position currently booked for a contract.
    #[must_use]
    pub fn position(&self, contract_id: ContractId) -> Quantity {
        self.risk.position(contract_id)
    }

    /// Cancel every open order belonging to one strategy, waiting a
    /// bounded time for the book to clear. Stragglers are logged and
    /// left for the next cancel pass to retry.
    pub async fn cancel_strategy_orders(&self, strategy_id: StrategyId) -> CancelOutcome {
        self.cancel_matching(|reference, codec| codec.belongs_to_strategy(reference, strategy_id))
            .await
    }

    /// Cancel every open order this client created, regardless of
    /// strategy. Foreign and manually entered orders are untouched.
    /// Returns how many orders were confirmed gone.
    pub async fn cancel_all(&self) -> usize {
        self.cancel_matching(|reference, codec| codec.belongs_to_client(reference))
            .await
            .cancelled
    }

    async fn cancel_matching(
        &self,
        ours: impl Fn(&str, &OrderRefCodec) -> bool,
    ) -> CancelOutcome {
        let open = match self.session.list_open_orders().await {
            Ok(open) => open,
            Err(err) => {
                warn!(error = %err, "could not list open orders, cancel skipped");
                return CancelOutcome { cancelled: 0, clean: false };
            }
        };
        let targets: Vec<_> = open
            .into_iter()
            .filter(|order| ours(&order.reference, &self.codec))
            .collect();
        if targets.is_empty() {
            return CancelOutcome { cancelled: 0, clean: true };
        }

        for order in &targets {
            if let Err(err) = self.session.cancel_order(order.handle).await {
                warn!(handle = order.handle, error = %err, "cancel request failed");
            }
        }

        // Confirmation is observed through the book, not the cancel call.
        let deadline = tokio::time::Instant::now() + self.cancel_wait;
        loop {
            let still_open = match self.session.list_open_orders().await {
                Ok(open) => open
                    .into_iter()
                    .filter(|order| ours(&order.reference, &self.codec))
                    .count(),
                Err(err) => {
                    warn!(error = %err, "could not confirm cancellations");
                    return CancelOutcome { cancelled: 0, clean: false };
                }
            };
            if still_open == 0 {
                return CancelOutcome { cancelled: targets.len(), clean: true };
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    still_open,
                    "cancellation wait expired, remaining orders left for the next pass"
                );
                return CancelOutcome {
                    cancelled: targets.len() - still_open,
                    clean: false,
                };
            }
            tokio::time::sleep(CANCEL_POLL).await;
        }
    }

    async fn resolve_price(
        &self,
        config: &StrategyConfig,
        contract_id: ContractId,
    ) -> Option<Price> {
        if config.initial_price > Decimal::ZERO {
            return Some(config.initial_price);
        }
        match self.session.fetch_market_price(contract_id).await {
            Ok(price) => Some(price),
            Err(err) => {
                warn!(
                    strategy = config.strategy_id,
                    error = %err,
                    "market price unavailable, grid postponed to next cycle"
                );
                None
            }
        }
    }
}
