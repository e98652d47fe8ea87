//! Exposure-based order authorization.

use std::collections::HashMap;

use gridline_core::{ContractId, Price, Quantity, Side, StrategyConfig};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Tracks net signed position per contract and gates new orders on the
/// projected notional exposure they would create.
///
/// `authorize` has no side effects; position state only moves when the
/// controller reports a completed fill through [`RiskGate::record_execution`].
#[derive(Debug, Default)]
pub struct RiskGate {
    /// Net signed quantity per contract, buys positive.
    positions: HashMap<ContractId, Quantity>,
}

impl RiskGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current signed position for a contract.
    #[must_use]
    pub fn position(&self, contract_id: ContractId) -> Quantity {
        self.positions
            .get(&contract_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Decide whether a proposed order keeps exposure within the
    /// strategy's configured bounds. A bound of zero means unbounded
    /// on that side.
    #[must_use]
    pub fn authorize(
        &self,
        config: &StrategyConfig,
        contract_id: ContractId,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> bool {
        let projected = self.position(contract_id) + signed(side, quantity);
        let notional = projected.abs() * price.abs() * config.instrument.multiplier();

        let bound = if projected >= Decimal::ZERO {
            config.max_long_risk
        } else {
            config.max_short_risk
        };
        if bound.is_zero() {
            return true;
        }
        if notional > bound {
            warn!(
                strategy = config.strategy_id,
                contract = contract_id,
                %side,
                %quantity,
                %price,
                %notional,
                %bound,
                "order refused, projected exposure exceeds bound"
            );
            return false;
        }
        true
    }

    /// Apply a completed fill to the tracked position.
    pub fn record_execution(&mut self, contract_id: ContractId, side: Side, quantity: Quantity) {
        let entry = self.positions.entry(contract_id).or_insert(Decimal::ZERO);
        *entry += signed(side, quantity);
        debug!(contract = contract_id, position = %entry, "position updated");
    }
}

fn signed(side: Side, quantity: Quantity) -> Quantity {
    match side {
        Side::Buy => quantity,
        Side::Sell => -quantity,
    }
}
