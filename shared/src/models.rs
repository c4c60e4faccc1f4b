use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entity::{schedulers, trading_orders};
use crate::error::EngineError;

/// Lowercase string codec shared by every status-like column
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(EngineError::InvalidInput(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Immediate,
    Scheduled,
    AdvanceTrigger,
}

string_enum!(ExecutionType {
    Immediate => "immediate",
    Scheduled => "scheduled",
    AdvanceTrigger => "advance_trigger",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Long,
    Short,
}

string_enum!(OrderSide {
    Long => "long",
    Short => "short",
});

impl OrderSide {
    /// Long positions are opened with a buy
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Long)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Cancelled,
}

string_enum!(OrderStatus {
    Pending => "pending",
    Executing => "executing",
    Executed => "executed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    Active,
    Claimed,
    Executed,
    Failed,
    Cancelled,
}

string_enum!(SchedulerStatus {
    Active => "active",
    Claimed => "claimed",
    Executed => "executed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl SchedulerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }

    /// Active rows, or rows currently held by a dispatcher, may still fire
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Active | Self::Claimed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    AtTime,
    Cron,
    Advance,
}

string_enum!(TriggerType {
    AtTime => "at_time",
    Cron => "cron",
    Advance => "advance",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketMetric {
    Volume,
    OpenInterest,
}

string_enum!(MarketMetric {
    Volume => "volume",
    OpenInterest => "open_interest",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    Above,
    Below,
}

string_enum!(CrossDirection {
    Above => "above",
    Below => "below",
});

/// Market condition of an advance trigger
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceCondition {
    pub metric: MarketMetric,
    pub direction: CrossDirection,
    pub threshold: f64,
    /// Single-shot conditions terminate after the first fire, others re-arm
    pub single_shot: bool,
}

/// Timing or market binding of a scheduler. Each variant carries only the
/// fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    AtTime { scheduled_at: DateTime<Utc> },
    Cron { expression: String, timezone: Tz },
    Advance(AdvanceCondition),
}

impl Trigger {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::AtTime { .. } => TriggerType::AtTime,
            Self::Cron { .. } => TriggerType::Cron,
            Self::Advance(_) => TriggerType::Advance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwapParams {
    pub running_time_minutes: u32,
    pub randomize: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingOrder {
    pub id: u64,
    pub user_address: String,
    pub execution_type: ExecutionType,
    pub side: OrderSide,
    pub asset: String,
    /// Notional size in USDC
    pub usdc_size: Decimal,
    pub leverage: u32,
    /// Per-order slippage override, bounded by the configured ceiling at intake
    pub slippage: Option<f64>,
    pub twap: Option<TwapParams>,
    pub status: OrderStatus,
    pub external_txn_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingOrder {
    pub fn is_twap(&self) -> bool {
        self.twap.is_some()
    }
}

/// Progress of a TWAP order driven by a single re-armed scheduler row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwapProgress {
    /// Index of the next slice to place
    pub slice_index: u32,
    pub slice_count: u32,
    pub seed: u64,
    /// Set when the first slice fires
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    pub id: u64,
    pub trading_order_id: u64,
    pub user_address: String,
    pub trigger: Trigger,
    pub status: SchedulerStatus,
    pub lease: Option<Lease>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_execution_at: DateTime<Utc>,
    pub fire_count: u32,
    pub twap: Option<TwapProgress>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type()
    }

    pub fn is_claimed_by(&self, owner: &str) -> bool {
        self.status == SchedulerStatus::Claimed
            && self.lease.as_ref().map(|l| l.owner == owner).unwrap_or(false)
    }

    /// Due for a claim: active and due, or claimed under an expired lease
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SchedulerStatus::Active => self.next_execution_at <= now,
            SchedulerStatus::Claimed => self
                .lease
                .as_ref()
                .map(|l| l.expires_at < now)
                .unwrap_or(true),
            _ => false,
        }
    }
}

/// Order as accepted by intake, before it gets an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_address: String,
    pub execution_type: ExecutionType,
    pub side: OrderSide,
    pub asset: String,
    pub usdc_size: Decimal,
    pub leverage: u32,
    pub slippage: Option<f64>,
    pub twap: Option<TwapParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduler {
    pub trigger: Trigger,
    pub next_execution_at: DateTime<Utc>,
    pub twap: Option<TwapProgress>,
}

fn corrupt(table: &str, id: u64, detail: impl fmt::Display) -> EngineError {
    EngineError::InvalidInput(format!("{} row {} is inconsistent: {}", table, id, detail))
}

impl TryFrom<trading_orders::Model> for TradingOrder {
    type Error = EngineError;

    fn try_from(row: trading_orders::Model) -> Result<Self, Self::Error> {
        let twap = match (row.is_twap, row.twap_running_time, row.twap_randomize) {
            (true, Some(running_time_minutes), randomize) => Some(TwapParams {
                running_time_minutes,
                randomize: randomize.unwrap_or(false),
            }),
            (true, None, _) => return Err(corrupt("trading_orders", row.id, "twap without running time")),
            (false, _, _) => None,
        };

        Ok(Self {
            id: row.id,
            user_address: row.user_address,
            execution_type: row.execution_type.parse()?,
            side: row.side.parse()?,
            asset: row.asset,
            usdc_size: row.usdc_size,
            leverage: row.leverage,
            slippage: row.slippage.and_then(|s| s.to_f64()),
            twap,
            status: row.status.parse()?,
            external_txn_hash: row.external_txn_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<schedulers::Model> for Scheduler {
    type Error = EngineError;

    fn try_from(row: schedulers::Model) -> Result<Self, Self::Error> {
        let trigger = match row.trigger_type.parse::<TriggerType>()? {
            TriggerType::AtTime => Trigger::AtTime {
                scheduled_at: row
                    .scheduled_at
                    .ok_or_else(|| corrupt("schedulers", row.id, "at_time without scheduled_at"))?,
            },
            TriggerType::Cron => {
                let expression = row
                    .cron
                    .clone()
                    .ok_or_else(|| corrupt("schedulers", row.id, "cron without expression"))?;
                let timezone = row.timezone.as_deref().unwrap_or("UTC");
                Trigger::Cron {
                    expression,
                    timezone: timezone
                        .parse::<Tz>()
                        .map_err(|e| corrupt("schedulers", row.id, e))?,
                }
            }
            TriggerType::Advance => Trigger::Advance(AdvanceCondition {
                metric: row
                    .advance_metric
                    .as_deref()
                    .ok_or_else(|| corrupt("schedulers", row.id, "advance without metric"))?
                    .parse()?,
                direction: row
                    .advance_direction
                    .as_deref()
                    .ok_or_else(|| corrupt("schedulers", row.id, "advance without direction"))?
                    .parse()?,
                threshold: row
                    .advance_threshold
                    .and_then(|t| t.to_f64())
                    .ok_or_else(|| corrupt("schedulers", row.id, "advance without threshold"))?,
                single_shot: row.advance_single_shot.unwrap_or(true),
            }),
        };

        let lease = match (row.lease_owner, row.lease_expires_at) {
            (Some(owner), Some(expires_at)) => Some(Lease { owner, expires_at }),
            _ => None,
        };

        let twap = match (row.twap_slice_index, row.twap_slice_count, row.twap_seed) {
            (Some(slice_index), Some(slice_count), Some(seed)) => Some(TwapProgress {
                slice_index,
                slice_count,
                seed,
                started_at: row.twap_started_at,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            trading_order_id: row.trading_order_id,
            user_address: row.user_address,
            trigger,
            status: row.status.parse()?,
            lease,
            last_executed_at: row.last_executed_at,
            next_execution_at: row.next_execution_at,
            fire_count: row.fire_count,
            twap,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column values of a trigger, in `schedulers` table layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerColumns {
    pub trigger_type: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub advance_metric: Option<String>,
    pub advance_direction: Option<String>,
    pub advance_threshold: Option<Decimal>,
    pub advance_single_shot: Option<bool>,
}

impl From<&Trigger> for TriggerColumns {
    fn from(trigger: &Trigger) -> Self {
        let trigger_type = trigger.trigger_type().as_str().to_string();
        match trigger {
            Trigger::AtTime { scheduled_at } => Self {
                trigger_type,
                scheduled_at: Some(*scheduled_at),
                ..Default::default()
            },
            Trigger::Cron { expression, timezone } => Self {
                trigger_type,
                cron: Some(expression.clone()),
                timezone: Some(timezone.name().to_string()),
                ..Default::default()
            },
            Trigger::Advance(condition) => Self {
                trigger_type,
                advance_metric: Some(condition.metric.as_str().to_string()),
                advance_direction: Some(condition.direction.as_str().to_string()),
                advance_threshold: Decimal::from_f64(condition.threshold),
                advance_single_shot: Some(condition.single_shot),
                ..Default::default()
            },
        }
    }
}
