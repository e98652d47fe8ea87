//! Strategy reconciliation.
//!
//! Once per cycle the raw configuration rows are parsed, diffed against
//! the tracked set from the previous cycle, and each surviving strategy
//! is tagged with the lifecycle action the controller must apply.

use std::collections::BTreeMap;

use gridline_broker::BrokerSession;
use gridline_core::{RawStrategyRow, StrategyAction, StrategyConfig, StrategyId};
use tracing::{debug, warn};

/// One tracked strategy and whether its tagged action has been applied.
#[derive(Debug)]
struct Tracked {
    config: StrategyConfig,
    /// Set once the controller reports the action fully carried out.
    applied: bool,
}

/// Diffs configuration snapshots across cycles.
#[derive(Debug, Default)]
pub struct Reconciler {
    tracked: BTreeMap<StrategyId, Tracked>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every tracked strategy. The next cycle re-evaluates all
    /// active rows as [`StrategyAction::New`], re-planting their grids.
    pub fn reset(&mut self) {
        debug!(tracked = self.tracked.len(), "clearing tracked strategies");
        self.tracked.clear();
    }

    /// Strategy currently known under this id, regardless of action.
    #[must_use]
    pub fn get(&self, strategy_id: StrategyId) -> Option<&StrategyConfig> {
        self.tracked.get(&strategy_id).map(|tracked| &tracked.config)
    }

    /// Mark the currently tagged action as fully applied.
    ///
    /// Until this is called the action is re-emitted every cycle: a
    /// launch postponed by contract or price resolution failure keeps
    /// its `New`/`Start` tag, and a wind-down whose cancellations did
    /// not all confirm keeps `Stop`/`Deleted` until the book is clean.
    pub fn confirm_applied(&mut self, strategy_id: StrategyId) {
        if let Some(tracked) = self.tracked.get_mut(&strategy_id) {
            tracked.applied = true;
            if matches!(
                tracked.config.action,
                StrategyAction::New | StrategyAction::Start
            ) {
                tracked.config.action = StrategyAction::Continue;
            }
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Returns the strategies the controller must act on this cycle, in
    /// id order, each tagged with its action. Contract ids are resolved
    /// here for strategies about to place orders; resolution failure
    /// leaves `contract_id` unset, which the controller treats as
    /// "skip this cycle".
    pub async fn reconcile(
        &mut self,
        rows: &[RawStrategyRow],
        session: &dyn BrokerSession,
    ) -> Vec<StrategyConfig> {
        let parsed = parse_rows(rows);
        let mut emitted = self.diff(parsed);

        for config in &mut emitted {
            let launching = matches!(config.action, StrategyAction::New | StrategyAction::Start);
            if !launching || config.contract_id.is_some() {
                continue;
            }
            match session.resolve_contract(&config.instrument).await {
                Ok(Some(contract_id)) => {
                    config.contract_id = Some(contract_id);
                }
                Ok(None) => {
                    warn!(
                        strategy = config.strategy_id,
                        symbol = %config.instrument.symbol,
                        "no contract matches the instrument, skipping this cycle"
                    );
                }
                Err(err) => {
                    warn!(
                        strategy = config.strategy_id,
                        symbol = %config.instrument.symbol,
                        error = %err,
                        "contract resolution failed, skipping this cycle"
                    );
                }
            }
            if let Some(tracked) = self.tracked.get_mut(&config.strategy_id) {
                tracked.config.contract_id = config.contract_id;
            }
        }

        emitted
    }

    /// Pure diff step: assign actions and roll the tracked set forward.
    fn diff(&mut self, parsed: Vec<StrategyConfig>) -> Vec<StrategyConfig> {
        let mut emitted = Vec::new();
        let mut next: BTreeMap<StrategyId, Tracked> = BTreeMap::new();

        for mut config in parsed {
            let id = config.strategy_id;
            if next.contains_key(&id) {
                warn!(strategy = id, "duplicate strategy id, keeping first row");
                continue;
            }
            // A row whose grid was already cancelled is a clean slate.
            let previous = self
                .tracked
                .remove(&id)
                .filter(|prev| prev.config.action != StrategyAction::Deleted);

            match previous {
                None => {
                    if config.active {
                        config.action = StrategyAction::New;
                        emitted.push(config.clone());
                        next.insert(id, Tracked { config, applied: false });
                    }
                    // Never-active rows are not tracked at all.
                }
                Some(previous) => match (previous.config.active, config.active) {
                    (true, false) => {
                        config.action = StrategyAction::Stop;
                        config.contract_id = previous.config.contract_id;
                        emitted.push(config.clone());
                        next.insert(id, Tracked { config, applied: false });
                    }
                    (false, true) => {
                        config.action = StrategyAction::Start;
                        emitted.push(config.clone());
                        next.insert(id, Tracked { config, applied: false });
                    }
                    (true, true) => {
                        // Fields are frozen while the strategy runs; live
                        // edits only take effect through an active toggle.
                        // A launch that has not been confirmed keeps its
                        // New/Start action and is retried.
                        let mut kept = previous.config;
                        if previous.applied {
                            kept.action = StrategyAction::Continue;
                        }
                        emitted.push(kept.clone());
                        next.insert(
                            id,
                            Tracked {
                                config: kept,
                                applied: previous.applied,
                            },
                        );
                    }
                    (false, false) => {
                        // Retained so a later reactivation yields Start.
                        // An unconfirmed cancel is announced again; once
                        // applied the row rests silently.
                        config.action = previous.config.action;
                        config.contract_id = previous.config.contract_id;
                        if !previous.applied {
                            emitted.push(config.clone());
                        }
                        next.insert(
                            id,
                            Tracked {
                                config,
                                applied: previous.applied,
                            },
                        );
                    }
                },
            }
        }

        // Whatever is left in the old tracked set vanished from the sheet.
        for (id, mut previous) in std::mem::take(&mut self.tracked) {
            if previous.config.action == StrategyAction::Deleted && previous.applied {
                // Announced last cycle, cancel confirmed clean.
                continue;
            }
            previous.config.action = StrategyAction::Deleted;
            previous.applied = false;
            emitted.push(previous.config.clone());
            next.insert(id, previous);
        }

        self.tracked = next;
        emitted
    }
}

fn parse_rows(rows: &[RawStrategyRow]) -> Vec<StrategyConfig> {
    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match StrategyConfig::from_row(row) {
            Ok(config) => parsed.push(config),
            Err(err) => warn!(row = index, error = %err, "dropping invalid strategy row"),
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridline_core::RawStrategyRow;

    fn row(strategy_id: i64, active: bool) -> RawStrategyRow {
        let mut row = RawStrategyRow::new();
        row.set("strategy_id", strategy_id.to_string())
            .set("mode", "STOCK")
            .set("symbol", "ACME")
            .set("exchange", "SMART")
            .set("currency", "USD")
            .set("active", if active { "true" } else { "false" })
            .set("initial_price", "100")
            .set("order_quantity", "1")
            .set("step", "5")
            .set("buy_levels", "2")
            .set("sell_levels", "2")
            .set("max_long_risk", "0")
            .set("max_short_risk", "0");
        row
    }

    /// One diff pass with every emitted action confirmed, as the runtime
    /// does after the controller fully applies it.
    fn diff(reconciler: &mut Reconciler, rows: &[RawStrategyRow]) -> Vec<StrategyConfig> {
        let emitted = reconciler.diff(parse_rows(rows));
        for config in &emitted {
            reconciler.confirm_applied(config.strategy_id);
        }
        emitted
    }

    fn actions(emitted: &[StrategyConfig]) -> Vec<(i64, StrategyAction)> {
        emitted.iter().map(|c| (c.strategy_id, c.action)).collect()
    }

    #[test]
    fn first_sighting_of_an_active_row_is_new() {
        let mut reconciler = Reconciler::new();
        let emitted = diff(&mut reconciler, &[row(1, true)]);
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::New)]);
    }

    #[test]
    fn never_active_rows_are_invisible() {
        let mut reconciler = Reconciler::new();
        assert!(diff(&mut reconciler, &[row(1, false)]).is_empty());
        assert!(reconciler.get(1).is_none());
        // Activation later is a fresh New, not a Start.
        let emitted = diff(&mut reconciler, &[row(1, true)]);
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::New)]);
    }

    #[test]
    fn deactivation_emits_stop_once_then_goes_quiet() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true)]);

        let emitted = diff(&mut reconciler, &[row(1, false)]);
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Stop)]);

        // Still inactive next cycle: tracked, but nothing emitted.
        let emitted = diff(&mut reconciler, &[row(1, false)]);
        assert!(emitted.is_empty());
        assert!(reconciler.get(1).is_some());

        // Reactivation from the tracked inactive state is a Start.
        let emitted = diff(&mut reconciler, &[row(1, true)]);
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Start)]);
    }

    #[test]
    fn continue_freezes_previous_fields() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true)]);

        let mut edited = row(1, true);
        edited.set("step", "9").set("initial_price", "200");
        let emitted = diff(&mut reconciler, &[edited]);

        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Continue)]);
        assert_eq!(emitted[0].step, rust_decimal::Decimal::from(5));
        assert_eq!(emitted[0].initial_price, rust_decimal::Decimal::from(100));
    }

    #[test]
    fn vanished_rows_are_deleted_exactly_once() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true), row(2, true)]);

        let emitted = diff(&mut reconciler, &[row(2, true)]);
        assert_eq!(
            actions(&emitted),
            vec![(1, StrategyAction::Deleted), (2, StrategyAction::Continue)]
        );

        // The deleted entry does not come back on the following pass.
        let emitted = diff(&mut reconciler, &[row(2, true)]);
        assert_eq!(actions(&emitted), vec![(2, StrategyAction::Continue)]);
        assert!(reconciler.get(1).is_none());
    }

    #[test]
    fn row_restored_after_deletion_is_new_again() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true)]);
        diff(&mut reconciler, &[]);

        let emitted = diff(&mut reconciler, &[row(1, true)]);
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::New)]);
    }

    #[test]
    fn unconfirmed_launch_is_retried_with_the_same_action() {
        let mut reconciler = Reconciler::new();
        let emitted = reconciler.diff(parse_rows(&[row(1, true)]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::New)]);

        // Not confirmed: the grid never made it to the book.
        let emitted = reconciler.diff(parse_rows(&[row(1, true)]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::New)]);

        reconciler.confirm_applied(1);
        let emitted = reconciler.diff(parse_rows(&[row(1, true)]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Continue)]);
    }

    #[test]
    fn unconfirmed_stop_is_announced_again_until_it_applies() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true)]);

        // The cancel pass did not clear the book: no confirmation.
        let emitted = reconciler.diff(parse_rows(&[row(1, false)]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Stop)]);
        let emitted = reconciler.diff(parse_rows(&[row(1, false)]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Stop)]);

        reconciler.confirm_applied(1);
        assert!(reconciler.diff(parse_rows(&[row(1, false)])).is_empty());
    }

    #[test]
    fn unconfirmed_deletion_is_announced_again_until_it_applies() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true)]);

        let emitted = reconciler.diff(parse_rows(&[]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Deleted)]);
        // Orders still resting, so the entry is announced again.
        let emitted = reconciler.diff(parse_rows(&[]));
        assert_eq!(actions(&emitted), vec![(1, StrategyAction::Deleted)]);

        reconciler.confirm_applied(1);
        assert!(reconciler.diff(parse_rows(&[])).is_empty());
        assert!(reconciler.get(1).is_none());
    }

    #[test]
    fn invalid_rows_are_dropped_without_affecting_siblings() {
        let mut reconciler = Reconciler::new();
        let mut broken = row(1, true);
        broken.set("step", "not-a-number");
        let emitted = diff(&mut reconciler, &[broken, row(2, true)]);
        assert_eq!(actions(&emitted), vec![(2, StrategyAction::New)]);
    }

    #[test]
    fn reset_replants_everything_as_new() {
        let mut reconciler = Reconciler::new();
        diff(&mut reconciler, &[row(1, true), row(2, true)]);
        diff(&mut reconciler, &[row(1, true), row(2, true)]);

        reconciler.reset();
        let emitted = diff(&mut reconciler, &[row(1, true), row(2, true)]);
        assert_eq!(
            actions(&emitted),
            vec![(1, StrategyAction::New), (2, StrategyAction::New)]
        );
    }
}
