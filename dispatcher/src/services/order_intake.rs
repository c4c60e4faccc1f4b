//! Order intake
//!
//! Validates an order request and persists it together with its scheduler
//! row. Everything is checked before the store is touched.
//!
//! Immediate non-TWAP orders get no row. Nothing polls for them: the caller
//! that submits one owns running it through `Dispatcher::execute_now`, also
//! after a restart, until the order leaves `PENDING`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::config::DispatcherSettings;
use shared::error::{EngineError, EngineResult};
use shared::models::{
    AdvanceCondition, ExecutionType, NewOrder, NewScheduler, OrderSide, Scheduler, TradingOrder,
    Trigger, TwapParams, TwapProgress,
};
use std::sync::Arc;
use tracing::info;

use super::cron::{parse_timezone, CronSchedule};
use super::twap::TwapSlicer;
use crate::repositories::OrderStore;

pub const MIN_TWAP_MINUTES: u32 = 5;
pub const MAX_TWAP_MINUTES: u32 = 1440;
pub const MAX_LEVERAGE: u32 = 50;

/// When an order should run
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleRequest {
    Immediate,
    At(DateTime<Utc>),
    Cron { expression: String, timezone: String },
    Advance(AdvanceCondition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub user_address: String,
    pub side: OrderSide,
    pub asset: String,
    pub usdc_size: Decimal,
    pub leverage: u32,
    pub slippage: Option<f64>,
    pub twap: Option<TwapParams>,
    pub schedule: ScheduleRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedOrder {
    pub order: TradingOrder,
    /// `None` for immediate non-TWAP orders, which run through `execute_now`
    pub scheduler: Option<Scheduler>,
}

pub struct OrderIntake {
    orders: Arc<dyn OrderStore>,
    settings: DispatcherSettings,
    slicer: TwapSlicer,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidInput(message.into())
}

impl OrderIntake {
    pub fn new(orders: Arc<dyn OrderStore>, settings: DispatcherSettings) -> Self {
        let slicer = TwapSlicer::new(settings.twap.clone());
        Self {
            orders,
            settings,
            slicer,
        }
    }

    /// Check a request and build the rows it would create
    pub fn validate(
        &self,
        request: &OrderRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<(NewOrder, Option<NewScheduler>)> {
        let user_address = request.user_address.trim();
        if user_address.is_empty() {
            return Err(invalid("user address is required"));
        }
        let asset = request.asset.trim().to_uppercase();
        if asset.is_empty() {
            return Err(invalid("asset is required"));
        }
        if request.usdc_size <= Decimal::ZERO {
            return Err(invalid(format!("usdc size must be positive, got {}", request.usdc_size)));
        }
        if !(1..=MAX_LEVERAGE).contains(&request.leverage) {
            return Err(invalid(format!(
                "leverage must be between 1 and {}, got {}",
                MAX_LEVERAGE, request.leverage
            )));
        }
        if let Some(slippage) = request.slippage {
            let ceiling = self.settings.default_slippage;
            if !slippage.is_finite() || !(0.0..=ceiling).contains(&slippage) {
                return Err(invalid(format!(
                    "slippage must be between 0 and {}, got {}",
                    ceiling, slippage
                )));
            }
        }

        let (execution_type, trigger, next_execution_at) = match &request.schedule {
            ScheduleRequest::Immediate => (ExecutionType::Immediate, None, now),
            ScheduleRequest::At(scheduled_at) => {
                if *scheduled_at < now {
                    return Err(invalid(format!("scheduled time {} is in the past", scheduled_at)));
                }
                (
                    ExecutionType::Scheduled,
                    Some(Trigger::AtTime { scheduled_at: *scheduled_at }),
                    *scheduled_at,
                )
            }
            ScheduleRequest::Cron { expression, timezone } => {
                if request.twap.is_some() {
                    return Err(invalid("TWAP cannot be combined with a cron schedule"));
                }
                let timezone = parse_timezone(timezone)?;
                let first = CronSchedule::parse(expression)?.next_after(now, timezone)?;
                (
                    ExecutionType::Scheduled,
                    Some(Trigger::Cron {
                        expression: expression.trim().to_string(),
                        timezone,
                    }),
                    first,
                )
            }
            ScheduleRequest::Advance(condition) => {
                if !condition.threshold.is_finite() || condition.threshold < 0.0 {
                    return Err(invalid(format!(
                        "advance threshold must be a non-negative number, got {}",
                        condition.threshold
                    )));
                }
                if request.twap.is_some() && !condition.single_shot {
                    return Err(invalid("TWAP requires a single-shot advance trigger"));
                }
                (ExecutionType::AdvanceTrigger, Some(Trigger::Advance(condition.clone())), now)
            }
        };

        let twap_progress = match request.twap {
            Some(params) => Some(self.validate_twap(request.usdc_size, params)?),
            None => None,
        };

        // immediate TWAP orders still need a row to carry their slices
        let trigger = match (trigger, twap_progress) {
            (None, Some(_)) => Some(Trigger::AtTime { scheduled_at: now }),
            (trigger, _) => trigger,
        };

        let order = NewOrder {
            user_address: user_address.to_string(),
            execution_type,
            side: request.side,
            asset,
            usdc_size: request.usdc_size,
            leverage: request.leverage,
            slippage: request.slippage,
            twap: request.twap,
        };
        let scheduler = trigger.map(|trigger| NewScheduler {
            trigger,
            next_execution_at,
            twap: twap_progress,
        });
        Ok((order, scheduler))
    }

    fn validate_twap(&self, total: Decimal, params: TwapParams) -> EngineResult<TwapProgress> {
        if !(MIN_TWAP_MINUTES..=MAX_TWAP_MINUTES).contains(&params.running_time_minutes) {
            return Err(invalid(format!(
                "TWAP running time must be between {} and {} minutes, got {}",
                MIN_TWAP_MINUTES, MAX_TWAP_MINUTES, params.running_time_minutes
            )));
        }

        let slice_count = self.slicer.derive_slice_count(total, params.running_time_minutes);
        let seed = rand::random::<u64>();
        // fails early when the total cannot be split
        self.slicer
            .plan(total, params.running_time_minutes, params.randomize, slice_count, seed)?;

        Ok(TwapProgress {
            slice_index: 0,
            slice_count,
            seed,
            started_at: None,
        })
    }

    /// Validate and persist a request
    pub async fn submit(&self, request: OrderRequest, now: DateTime<Utc>) -> anyhow::Result<SubmittedOrder> {
        let (order, scheduler) = self.validate(&request, now)?;
        let (order, scheduler) = self.orders.create_order(order, scheduler).await?;

        match &scheduler {
            Some(scheduler) => info!(
                "📥 Order {} accepted: {} {} {} USDC, scheduler {} ({}) due at {}",
                order.id,
                order.side,
                order.asset,
                order.usdc_size,
                scheduler.id,
                scheduler.trigger_type(),
                scheduler.next_execution_at
            ),
            None => info!(
                "📥 Order {} accepted for immediate execution: {} {} {} USDC",
                order.id, order.side, order.asset, order.usdc_size
            ),
        }
        Ok(SubmittedOrder { order, scheduler })
    }
}
