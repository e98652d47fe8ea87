//! Fundamental data types shared across the entire workspace.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod order_ref;

pub use order_ref::{NotMine, OrderRef, OrderRefCodec};

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Broker-assigned contract identifier obtained from contract qualification.
pub type ContractId = i64;
/// Identifier of a strategy row, unique among active strategies.
pub type StrategyId = i64;
/// Identifier of the API client session placing orders.
pub type ClientId = i32;

/// The side of an order or fill.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

/// Instrument family a strategy trades.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Stock,
    Future,
}

/// Extra contract fields required when `mode` is [`Mode::Future`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FutureSpec {
    /// Last trade date or contract month, e.g. `20240315` or `202403`.
    pub contract_month: String,
    pub local_symbol: String,
    pub multiplier: String,
}

/// Broker-agnostic description of the instrument a strategy trades.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstrumentSpec {
    pub mode: Mode,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub future: Option<FutureSpec>,
}

impl InstrumentSpec {
    /// Contract multiplier as a decimal factor; `1` for stocks or malformed input.
    #[must_use]
    pub fn multiplier(&self) -> Decimal {
        self.future
            .as_ref()
            .and_then(|f| f.multiplier.trim().parse::<Decimal>().ok())
            .filter(|m| *m > Decimal::ZERO)
            .unwrap_or(Decimal::ONE)
    }
}

/// Life-cycle action assigned to a strategy during reconciliation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StrategyAction {
    /// The configuration belongs to a strategy seen for the first time.
    New,
    /// A previously stopped strategy became active again.
    Start,
    /// An active strategy was deactivated; its orders must be cancelled.
    Stop,
    /// The strategy keeps working unchanged.
    Continue,
    /// The row disappeared from the source; cancel and forget the strategy.
    Deleted,
}

/// One raw key/value row read from the configuration source.
///
/// The source stores everything as strings; [`StrategyConfig::from_row`] is
/// the only place where fields are typed and validated.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RawStrategyRow(pub BTreeMap<String, String>);

impl RawStrategyRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the trimmed field value, treating blank cells as missing.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Reasons a raw row failed validation and was dropped for the cycle.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a valid number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field '{0}' must not be negative")]
    NegativeField(&'static str),
    #[error("field '{0}' must be positive")]
    NonPositiveField(&'static str),
    #[error("unknown mode '{0}' (expected STOCK or FUTURE)")]
    UnknownMode(String),
}

/// Fully typed configuration of one grid strategy.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StrategyConfig {
    pub strategy_id: StrategyId,
    pub instrument: InstrumentSpec,
    pub active: bool,
    /// Central grid price; [`Decimal::ZERO`] means "fetch from the market".
    pub initial_price: Price,
    pub order_quantity: Quantity,
    /// Grid spacing between adjacent ladder levels.
    pub step: Decimal,
    pub buy_levels: u32,
    pub sell_levels: u32,
    pub max_long_risk: Decimal,
    pub max_short_risk: Decimal,
    /// Assigned after broker contract qualification; `None` skips the cycle.
    pub contract_id: Option<ContractId>,
    pub action: StrategyAction,
}

impl StrategyConfig {
    /// Parse and validate one raw configuration row.
    ///
    /// Field presence is never trusted: every required field is checked, every
    /// numeric field is range-checked, and the error names the offending
    /// field so the reconciler can log a useful line before dropping the row.
    pub fn from_row(row: &RawStrategyRow) -> Result<Self, RowError> {
        let strategy_id = parse_int(row, "strategy_id")?;
        let mode = match required(row, "mode")? {
            "STOCK" => Mode::Stock,
            "FUTURE" => Mode::Future,
            other => return Err(RowError::UnknownMode(other.to_string())),
        };
        let future = match mode {
            Mode::Stock => None,
            Mode::Future => Some(FutureSpec {
                contract_month: required(row, "future_contract_month")?.to_string(),
                local_symbol: required(row, "future_local_symbol")?.to_string(),
                multiplier: required(row, "future_multiplier")?.to_string(),
            }),
        };
        let instrument = InstrumentSpec {
            mode,
            symbol: required(row, "symbol")?.to_string(),
            exchange: required(row, "exchange")?.to_string(),
            currency: required(row, "currency")?.to_string(),
            future,
        };

        let active = row
            .field("active")
            .map(is_truthy)
            .ok_or(RowError::MissingField("active"))?;
        let initial_price = parse_decimal(row, "initial_price")?;
        let order_quantity = parse_decimal(row, "order_quantity")?;
        let step = parse_decimal(row, "step")?;
        let buy_levels = parse_levels(row, "buy_levels")?;
        let sell_levels = parse_levels(row, "sell_levels")?;
        let max_long_risk = parse_decimal(row, "max_long_risk")?;
        let max_short_risk = parse_decimal(row, "max_short_risk")?;

        if initial_price < Decimal::ZERO {
            return Err(RowError::NegativeField("initial_price"));
        }
        if order_quantity <= Decimal::ZERO {
            return Err(RowError::NonPositiveField("order_quantity"));
        }
        if step <= Decimal::ZERO {
            return Err(RowError::NonPositiveField("step"));
        }
        if max_long_risk < Decimal::ZERO {
            return Err(RowError::NegativeField("max_long_risk"));
        }
        if max_short_risk < Decimal::ZERO {
            return Err(RowError::NegativeField("max_short_risk"));
        }

        Ok(Self {
            strategy_id,
            instrument,
            active,
            initial_price,
            order_quantity,
            step,
            buy_levels,
            sell_levels,
            max_long_risk,
            max_short_risk,
            contract_id: None,
            action: StrategyAction::New,
        })
    }
}

fn required<'a>(row: &'a RawStrategyRow, field: &'static str) -> Result<&'a str, RowError> {
    row.field(field).ok_or(RowError::MissingField(field))
}

fn parse_int(row: &RawStrategyRow, field: &'static str) -> Result<i64, RowError> {
    let raw = required(row, field)?;
    raw.parse().map_err(|_| RowError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

fn parse_decimal(row: &RawStrategyRow, field: &'static str) -> Result<Decimal, RowError> {
    let raw = required(row, field)?;
    raw.replace(',', ".")
        .parse()
        .map_err(|_| RowError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

fn parse_levels(row: &RawStrategyRow, field: &'static str) -> Result<u32, RowError> {
    let value = parse_int(row, field)?;
    u32::try_from(value).map_err(|_| RowError::NegativeField(field))
}

/// Spreadsheet cells carry booleans in several spellings.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "on"
    )
}

/// Broker-reported fill for one of our orders.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Execution {
    /// The flat reference string the order was submitted with.
    pub order_ref: String,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    /// Zero means the order is completely filled.
    pub remaining: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl Execution {
    /// Whether this event completes the order.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Process-wide connection status, owned by the connection supervisor.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_connected_at: DateTime<Utc>,
    pub disconnected_since: Option<DateTime<Utc>>,
}

impl ConnectionState {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            connected: false,
            last_connected_at: now,
            disconnected_since: Some(now),
        }
    }

    /// Seconds spent disconnected, or zero while connected.
    #[must_use]
    pub fn outage_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.disconnected_since {
            Some(since) => (now - since).num_seconds().max(0),
            None => 0,
        }
    }
}
