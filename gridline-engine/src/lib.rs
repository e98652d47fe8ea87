//! Grid strategy reconciliation and order lifecycle engine.
//!
//! The pieces compose leaf-first: the [`planner`] derives ladder prices,
//! the [`risk`] gate authorizes each order, the [`reconciler`] diffs
//! configuration snapshots into lifecycle actions, the [`controller`]
//! turns actions and fills into broker calls, and the [`supervisor`]
//! keeps the broker session alive underneath it all.

pub mod controller;
pub mod heartbeat;
pub mod planner;
pub mod reconciler;
pub mod risk;
pub mod supervisor;

pub use controller::{ActionOutcome, CancelOutcome, OrderController};
pub use heartbeat::write_heartbeat;
pub use planner::PlannedOrder;
pub use reconciler::Reconciler;
pub use risk::RiskGate;
pub use supervisor::{ConnectionSupervisor, Recovery};
