//! Grid order planner.
//!
//! Pure price arithmetic: given a strategy and a reference price, derive
//! the initial ladder; given a completed fill, derive the single reactive
//! counter-order that keeps the ladder width constant.

use gridline_core::{Price, Side, StrategyConfig};
use rust_decimal::Decimal;
use tracing::debug;

/// One order the planner wants on the book.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlannedOrder {
    pub side: Side,
    pub price: Price,
}

/// Full ladder for a freshly launched strategy.
///
/// Buys at `reference - step*k` for k=1..buy_levels, sells at
/// `reference + step*k` for k=1..sell_levels. Buy prices are allowed to
/// go to zero or below for very aggressive grids; they are logged and
/// passed through unclamped.
pub fn initial_ladder(config: &StrategyConfig, reference_price: Price) -> Vec<PlannedOrder> {
    let mut ladder = Vec::with_capacity((config.buy_levels + config.sell_levels) as usize);
    for k in 1..=config.buy_levels {
        let price = reference_price - config.step * Decimal::from(k);
        if price <= Decimal::ZERO {
            debug!(
                strategy = config.strategy_id,
                level = k,
                %price,
                "buy level priced at or below zero"
            );
        }
        ladder.push(PlannedOrder {
            side: Side::Buy,
            price,
        });
    }
    for k in 1..=config.sell_levels {
        ladder.push(PlannedOrder {
            side: Side::Sell,
            price: reference_price + config.step * Decimal::from(k),
        });
    }
    ladder
}

/// The opposite-side replacement after a completed fill: one step below
/// a sell fill, one step above a buy fill.
pub fn reactive_order(filled_side: Side, fill_price: Price, step: Price) -> PlannedOrder {
    let price = match filled_side {
        Side::Sell => fill_price - step,
        Side::Buy => fill_price + step,
    };
    PlannedOrder {
        side: filled_side.inverse(),
        price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridline_core::{InstrumentSpec, Mode, StrategyAction};

    fn strategy(buy_levels: u32, sell_levels: u32, step: Price) -> StrategyConfig {
        StrategyConfig {
            strategy_id: 1,
            instrument: InstrumentSpec {
                mode: Mode::Stock,
                symbol: "ACME".into(),
                exchange: "SMART".into(),
                currency: "USD".into(),
                future: None,
            },
            active: true,
            initial_price: Decimal::from(100),
            order_quantity: Decimal::from(1),
            step,
            buy_levels,
            sell_levels,
            max_long_risk: Decimal::ZERO,
            max_short_risk: Decimal::ZERO,
            contract_id: Some(7),
            action: StrategyAction::New,
        }
    }

    #[test]
    fn ladder_spaces_levels_around_the_reference() {
        let ladder = initial_ladder(&strategy(2, 1, Decimal::from(5)), Decimal::from(100));
        assert_eq!(
            ladder,
            vec![
                PlannedOrder {
                    side: Side::Buy,
                    price: Decimal::from(95)
                },
                PlannedOrder {
                    side: Side::Buy,
                    price: Decimal::from(90)
                },
                PlannedOrder {
                    side: Side::Sell,
                    price: Decimal::from(105)
                },
            ]
        );
    }

    #[test]
    fn zero_levels_produce_an_empty_ladder() {
        assert!(initial_ladder(&strategy(0, 0, Decimal::from(5)), Decimal::from(100)).is_empty());
    }

    #[test]
    fn aggressive_grids_may_cross_zero_unclamped() {
        let ladder = initial_ladder(&strategy(3, 0, Decimal::from(40)), Decimal::from(100));
        assert_eq!(ladder[2].price, Decimal::from(-20));
    }

    #[test]
    fn sell_fill_reacts_with_a_buy_one_step_below() {
        let reaction = reactive_order(Side::Sell, Decimal::from(105), Decimal::from(5));
        assert_eq!(
            reaction,
            PlannedOrder {
                side: Side::Buy,
                price: Decimal::from(100)
            }
        );
    }

    #[test]
    fn buy_fill_reacts_with_a_sell_one_step_above() {
        let reaction = reactive_order(Side::Buy, Decimal::from(90), Decimal::from(5));
        assert_eq!(
            reaction,
            PlannedOrder {
                side: Side::Sell,
                price: Decimal::from(95)
            }
        );
    }
}
