//! Execution dispatcher
//!
//! Polls due scheduler rows, claims them under a lease, evaluates their
//! trigger and fires the order. Every claimed row leaves this module either
//! committed (re-armed or terminal) or released.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use shared::config::DispatcherSettings;
use shared::error::{EngineError, EngineResult};
use shared::models::{
    ExecutionType, OrderStatus, Scheduler, SchedulerStatus, TradingOrder, Trigger, TwapProgress,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::order_state;
use super::price_engine::adjusted_price;
use super::retry::place_with_retry;
use super::trigger::{evaluate, next_recurrence, EvaluationSnapshot};
use super::twap::TwapSlicer;
use crate::clients::{MarketSnapshotProvider, OrderPlacementClient, PlacementRequest};
use crate::repositories::{
    CancelOutcome, FireCommit, OrderTransition, SchedulerOutcome, Stores,
};

/// Tally of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub due: usize,
    /// Lost to another dispatcher or no longer due
    pub conflicts: usize,
    /// Evaluated without firing, or handed back after a market data error
    pub released: usize,
    pub fired: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Conflict,
    Released,
    Fired,
    Failed,
    Cancelled,
    Error,
}

impl PollReport {
    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::Conflict => self.conflicts += 1,
            CandidateOutcome::Released => self.released += 1,
            CandidateOutcome::Fired => self.fired += 1,
            CandidateOutcome::Failed => self.failed += 1,
            CandidateOutcome::Cancelled => self.cancelled += 1,
            CandidateOutcome::Error => self.errors += 1,
        }
    }
}

/// What a fire does once its placement succeeds
#[derive(Debug, Clone, PartialEq)]
struct FirePlan {
    /// USDC notional placed by this fire
    size: Decimal,
    /// Scheduler state after a successful placement
    outcome: SchedulerOutcome,
    /// Order is done once this fire lands
    completes_order: bool,
}

pub struct Dispatcher {
    stores: Stores,
    placement: Arc<dyn OrderPlacementClient>,
    market: Arc<dyn MarketSnapshotProvider>,
    settings: DispatcherSettings,
    slicer: TwapSlicer,
}

impl Dispatcher {
    pub fn new(
        stores: Stores,
        placement: Arc<dyn OrderPlacementClient>,
        market: Arc<dyn MarketSnapshotProvider>,
        settings: DispatcherSettings,
    ) -> Self {
        let slicer = TwapSlicer::new(settings.twap.clone());
        Self {
            stores,
            placement,
            market,
            settings,
            slicer,
        }
    }

    pub fn owner(&self) -> &str {
        &self.settings.dispatcher_id
    }

    /// Poll every `poll_interval` until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "🚀 Dispatcher {} polling every {:?} (lease {:?}, batch {}, concurrency {})",
            self.owner(),
            self.settings.poll_interval,
            self.settings.lease,
            self.settings.batch_size,
            self.settings.worker_concurrency
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.poll_once(Utc::now()).await;
                    if report.due > 0 {
                        info!(
                            "Poll: {} due, {} fired, {} failed, {} cancelled, {} released, {} conflicts, {} errors",
                            report.due, report.fired, report.failed, report.cancelled,
                            report.released, report.conflicts, report.errors
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Dispatcher {} stopping", self.owner());
                        break;
                    }
                }
            }
        }
    }

    /// One claim-evaluate-commit pass over the rows due at `now`.
    /// Leases run from the moment each row is claimed, not from `now`.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> PollReport {
        let mut report = PollReport::default();
        let started = Instant::now();

        let due = match self
            .stores
            .schedulers
            .list_due(now, self.settings.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to list due schedulers: {:#}", e);
                report.errors += 1;
                return report;
            }
        };
        report.due = due.len();

        let ids: Vec<u64> = due.iter().map(|s| s.id).collect();
        let outcomes: Vec<CandidateOutcome> = stream::iter(ids)
            .map(|id| self.handle_candidate(id, now, started))
            .buffer_unordered(self.settings.worker_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }

    async fn handle_candidate(&self, id: u64, now: DateTime<Utc>, poll_started: Instant) -> CandidateOutcome {
        let (lease, waited) = match (
            chrono::Duration::from_std(self.settings.lease),
            chrono::Duration::from_std(poll_started.elapsed()),
        ) {
            (Ok(lease), Ok(waited)) => (lease, waited),
            _ => {
                error!("Lease {:?} is out of range", self.settings.lease);
                return CandidateOutcome::Error;
            }
        };
        // earlier candidates in the batch may have taken a while to place
        let claimed_at = now + waited;

        match self
            .stores
            .schedulers
            .try_claim(id, now, self.owner(), claimed_at + lease)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("{}", EngineError::ClaimConflict { scheduler_id: id });
                return CandidateOutcome::Conflict;
            }
            Err(e) => {
                error!("Failed to claim scheduler {}: {:#}", id, e);
                return CandidateOutcome::Error;
            }
        }

        match self.process_claimed(id, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Scheduler {} failed to process: {:#}", id, e);
                self.release(id).await;
                CandidateOutcome::Error
            }
        }
    }

    async fn release(&self, id: u64) {
        if let Err(e) = self.stores.schedulers.release_claim(id, self.owner()).await {
            error!("Failed to release scheduler {}: {:#}", id, e);
        }
    }

    async fn with_market_timeout<T>(
        &self,
        what: &str,
        call: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        tokio::time::timeout(self.settings.market_data_timeout, call)
            .await
            .map_err(|_| {
                EngineError::MarketData(format!(
                    "{} timed out after {:?}",
                    what, self.settings.market_data_timeout
                ))
            })?
    }

    async fn process_claimed(&self, id: u64, now: DateTime<Utc>) -> anyhow::Result<CandidateOutcome> {
        let scheduler = self
            .stores
            .schedulers
            .get(id)
            .await?
            .ok_or(EngineError::NotFound { entity: "scheduler", id })?;
        if !scheduler.is_claimed_by(self.owner()) {
            debug!("{}", EngineError::ClaimConflict { scheduler_id: id });
            return Ok(CandidateOutcome::Conflict);
        }

        let order = self
            .stores
            .orders
            .get_order(scheduler.trading_order_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "trading order",
                id: scheduler.trading_order_id,
            })?;

        if order.status.is_terminal() {
            return self.close_for_finished_order(&scheduler, &order, now).await;
        }

        let twap_started = scheduler.twap.map(|p| p.started_at.is_some()).unwrap_or(false);
        let market_figure = match &scheduler.trigger {
            Trigger::Advance(condition) if !twap_started => {
                let read = self
                    .with_market_timeout(
                        "market figure",
                        self.market.get_volume_or_oi(&order.asset, condition.metric),
                    )
                    .await;
                match read {
                    Ok(figure) => Some(figure),
                    Err(e) => {
                        warn!("Scheduler {}: {}, retrying next poll", id, e);
                        self.release(id).await;
                        return Ok(CandidateOutcome::Released);
                    }
                }
            }
            _ => None,
        };

        let decision = evaluate(&scheduler, &EvaluationSnapshot { now, market_figure });
        if !decision.fire {
            debug!("Scheduler {} holds: {}", id, decision.reason);
            self.release(id).await;
            return Ok(CandidateOutcome::Released);
        }

        info!("⚡ Scheduler {} fires for order {}: {}", id, order.id, decision.reason);
        self.fire(&scheduler, &order, now).await
    }

    /// The order reached a terminal state outside this row
    async fn close_for_finished_order(
        &self,
        scheduler: &Scheduler,
        order: &TradingOrder,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CandidateOutcome> {
        let (status, outcome) = if order.status == OrderStatus::Cancelled {
            (SchedulerStatus::Cancelled, CandidateOutcome::Cancelled)
        } else {
            (SchedulerStatus::Failed, CandidateOutcome::Failed)
        };
        warn!(
            "Scheduler {} closed as {}: order {} is already {}",
            scheduler.id, status, order.id, order.status
        );

        let committed = self
            .stores
            .schedulers
            .commit_fire(FireCommit {
                scheduler_id: scheduler.id,
                owner: self.owner().to_string(),
                now,
                executed_at: None,
                order_id: order.id,
                order: None,
                outcome: SchedulerOutcome::Terminal {
                    status,
                    failure_reason: Some(format!("order is {}", order.status)),
                },
            })
            .await?;
        Ok(if committed { outcome } else { CandidateOutcome::Conflict })
    }

    /// Work out what a successful fire leads to, before anything is placed
    fn plan_fire(&self, scheduler: &Scheduler, order: &TradingOrder, now: DateTime<Utc>) -> EngineResult<FirePlan> {
        if let (Some(params), Some(progress)) = (order.twap, scheduler.twap) {
            let started_at = progress.started_at.unwrap_or(now);
            let mut plan = self.slicer.plan(
                order.usdc_size,
                params.running_time_minutes,
                params.randomize,
                progress.slice_count,
                progress.seed,
            )?;
            let slice = plan.nth(progress.slice_index as usize).ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "TWAP slice {} out of range 0..{}",
                    progress.slice_index, progress.slice_count
                ))
            })?;

            return Ok(match plan.next() {
                Some(next) => FirePlan {
                    size: slice.size,
                    outcome: SchedulerOutcome::Rearm {
                        next_execution_at: started_at + next.offset,
                        twap: Some(TwapProgress {
                            slice_index: next.index,
                            started_at: Some(started_at),
                            ..progress
                        }),
                    },
                    completes_order: false,
                },
                None => FirePlan {
                    size: slice.size,
                    outcome: SchedulerOutcome::Terminal {
                        status: SchedulerStatus::Executed,
                        failure_reason: None,
                    },
                    completes_order: true,
                },
            });
        }

        let rearm = chrono::Duration::from_std(self.settings.advance_rearm)
            .map_err(|e| EngineError::InvalidInput(format!("advance re-arm out of range: {}", e)))?;
        Ok(match next_recurrence(&scheduler.trigger, now, rearm)? {
            Some(next_execution_at) => FirePlan {
                size: order.usdc_size,
                outcome: SchedulerOutcome::Rearm {
                    next_execution_at,
                    twap: None,
                },
                completes_order: false,
            },
            None => FirePlan {
                size: order.usdc_size,
                outcome: SchedulerOutcome::Terminal {
                    status: SchedulerStatus::Executed,
                    failure_reason: None,
                },
                completes_order: true,
            },
        })
    }

    /// Slippage-adjusted limit price for `order` from a fresh snapshot
    async fn limit_price(&self, order: &TradingOrder) -> EngineResult<Decimal> {
        let base = self
            .with_market_timeout("price", self.market.get_price(&order.asset))
            .await?;
        let precision = self
            .with_market_timeout("tick precision", self.market.get_tick_precision(&order.asset))
            .await?;
        let slippage = order.slippage.unwrap_or(self.settings.default_slippage);
        adjusted_price(base, order.side.is_buy(), slippage, precision)
    }

    async fn fire(
        &self,
        scheduler: &Scheduler,
        order: &TradingOrder,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CandidateOutcome> {
        let plan = match self.plan_fire(scheduler, order, now) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Scheduler {} cannot continue: {}", scheduler.id, e);
                return self.fail(scheduler, order.status, now, e.to_string()).await;
            }
        };

        let limit_price = match self.limit_price(order).await {
            Ok(price) => price,
            Err(e @ EngineError::InvalidInput(_)) => {
                error!("Scheduler {} has no valid price: {}", scheduler.id, e);
                return self.fail(scheduler, order.status, now, e.to_string()).await;
            }
            Err(e) => {
                warn!("Scheduler {}: {}, retrying next poll", scheduler.id, e);
                self.release(scheduler.id).await;
                return Ok(CandidateOutcome::Released);
            }
        };

        if order.status == OrderStatus::Pending {
            let started = self
                .stores
                .orders
                .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Executing, None)
                .await?;
            if !started {
                warn!("Order {} left PENDING concurrently, releasing scheduler {}", order.id, scheduler.id);
                self.release(scheduler.id).await;
                return Ok(CandidateOutcome::Conflict);
            }
        }

        let request = PlacementRequest {
            order_id: order.id,
            client_order_id: format!("sched-{}-{}", scheduler.id, scheduler.fire_count),
            asset: order.asset.clone(),
            side: order.side,
            size: plan.size,
            leverage: order.leverage,
            limit_price,
        };

        let receipt = match place_with_retry(
            self.placement.as_ref(),
            &request,
            self.settings.placement_timeout,
            &self.settings.retry,
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("❌ Placement for scheduler {} failed: {}", scheduler.id, e);
                return self.fail(scheduler, OrderStatus::Executing, now, e.to_string()).await;
            }
        };

        let order_status = if plan.completes_order {
            OrderStatus::Executed
        } else {
            OrderStatus::Executing
        };
        let committed = self
            .stores
            .schedulers
            .commit_fire(FireCommit {
                scheduler_id: scheduler.id,
                owner: self.owner().to_string(),
                now,
                executed_at: Some(now),
                order_id: order.id,
                order: Some(OrderTransition {
                    expected: OrderStatus::Executing,
                    status: order_status,
                    txn_hash: Some(receipt.txn_hash.clone()),
                }),
                outcome: plan.outcome.clone(),
            })
            .await?;

        if !committed {
            error!(
                "Placed {} ({}) but lost scheduler {} before commit",
                request.client_order_id, receipt.txn_hash, scheduler.id
            );
            return Ok(CandidateOutcome::Conflict);
        }

        match &plan.outcome {
            SchedulerOutcome::Rearm { next_execution_at, .. } => info!(
                "✅ Order {} placed {} @ {} ({}), next fire at {}",
                order.id, request.client_order_id, limit_price, receipt.txn_hash, next_execution_at
            ),
            SchedulerOutcome::Terminal { .. } => info!(
                "✅ Order {} placed {} @ {} ({}), order {}",
                order.id, request.client_order_id, limit_price, receipt.txn_hash, order_status
            ),
        }
        Ok(CandidateOutcome::Fired)
    }

    /// Terminal failure of the row and its order
    async fn fail(
        &self,
        scheduler: &Scheduler,
        order_status: OrderStatus,
        now: DateTime<Utc>,
        reason: String,
    ) -> anyhow::Result<CandidateOutcome> {
        let order = order_state::can_transition(order_status, OrderStatus::Failed).then(|| OrderTransition {
            expected: order_status,
            status: OrderStatus::Failed,
            txn_hash: None,
        });

        let committed = self
            .stores
            .schedulers
            .commit_fire(FireCommit {
                scheduler_id: scheduler.id,
                owner: self.owner().to_string(),
                now,
                executed_at: None,
                order_id: scheduler.trading_order_id,
                order,
                outcome: SchedulerOutcome::Terminal {
                    status: SchedulerStatus::Failed,
                    failure_reason: Some(reason),
                },
            })
            .await?;

        if committed {
            Ok(CandidateOutcome::Failed)
        } else {
            self.release(scheduler.id).await;
            Ok(CandidateOutcome::Conflict)
        }
    }

    /// Run an immediate, non-TWAP order right away. It has no scheduler row.
    ///
    /// Nothing polls for such orders: the caller that submitted the order owns
    /// calling this, and calling it again after a restart while the order is
    /// still `PENDING`. Any dispatcher instance can do it.
    pub async fn execute_now(&self, order_id: u64, now: DateTime<Utc>) -> anyhow::Result<TradingOrder> {
        let order = self
            .stores
            .orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound { entity: "trading order", id: order_id })?;

        if order.execution_type != ExecutionType::Immediate || order.is_twap() {
            return Err(EngineError::InvalidInput(format!(
                "order {} is {}{}, not a plain immediate order",
                order.id,
                order.execution_type,
                if order.is_twap() { " TWAP" } else { "" }
            ))
            .into());
        }
        order_state::transition(order.status, OrderStatus::Executing)?;

        let limit_price = match self.limit_price(&order).await {
            Ok(price) => price,
            Err(e @ EngineError::InvalidInput(_)) => {
                self.stores
                    .orders
                    .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Failed, None)
                    .await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let started = self
            .stores
            .orders
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Executing, None)
            .await?;
        if !started {
            return Err(EngineError::InvalidInput(format!("order {} is no longer pending", order.id)).into());
        }

        let request = PlacementRequest {
            order_id: order.id,
            client_order_id: format!("order-{}", order.id),
            asset: order.asset.clone(),
            side: order.side,
            size: order.usdc_size,
            leverage: order.leverage,
            limit_price,
        };

        match place_with_retry(
            self.placement.as_ref(),
            &request,
            self.settings.placement_timeout,
            &self.settings.retry,
        )
        .await
        {
            Ok(receipt) => {
                self.stores
                    .orders
                    .update_order_status(
                        order.id,
                        OrderStatus::Executing,
                        OrderStatus::Executed,
                        Some(receipt.txn_hash.clone()),
                    )
                    .await?;
                info!(
                    "✅ Immediate order {} placed @ {} ({}) at {}",
                    order.id, limit_price, receipt.txn_hash, now
                );
            }
            Err(e) => {
                error!("❌ Immediate order {} failed: {}", order.id, e);
                self.stores
                    .orders
                    .update_order_status(order.id, OrderStatus::Executing, OrderStatus::Failed, None)
                    .await?;
            }
        }

        self.stores
            .orders
            .get_order(order.id)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: "trading order", id: order.id }.into())
    }

    /// Cancel a scheduler and its order. Claimed rows report `Executing`.
    pub async fn cancel(&self, scheduler_id: u64, now: DateTime<Utc>) -> anyhow::Result<CancelOutcome> {
        let outcome = self.stores.schedulers.cancel(scheduler_id, now).await?;
        match outcome {
            CancelOutcome::Cancelled => info!("🚫 Scheduler {} cancelled", scheduler_id),
            CancelOutcome::Executing => info!("Scheduler {} is executing, cancel later", scheduler_id),
            CancelOutcome::AlreadyTerminal(status) => {
                info!("Scheduler {} is already {}", scheduler_id, status)
            }
            CancelOutcome::NotFound => warn!("Scheduler {} not found", scheduler_id),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::PlacementReceipt;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use shared::models::{MarketMetric, NewOrder, NewScheduler, OrderSide, TwapParams};

    struct FixedMarket;

    #[async_trait]
    impl MarketSnapshotProvider for FixedMarket {
        async fn get_price(&self, _asset: &str) -> EngineResult<f64> {
            Ok(100.0)
        }

        async fn get_volume_or_oi(&self, _asset: &str, _metric: MarketMetric) -> EngineResult<f64> {
            Ok(0.0)
        }

        async fn get_tick_precision(&self, _asset: &str) -> EngineResult<u32> {
            Ok(1)
        }
    }

    struct Unused;

    #[async_trait]
    impl OrderPlacementClient for Unused {
        async fn place(&self, _request: &PlacementRequest) -> EngineResult<PlacementReceipt> {
            Err(EngineError::Placement("not expected".to_string()))
        }
    }

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn dispatcher() -> Dispatcher {
        let (stores, _) = Stores::in_memory();
        Dispatcher::new(stores, Arc::new(Unused), Arc::new(FixedMarket), DispatcherSettings::default())
    }

    fn order(twap: Option<TwapParams>) -> TradingOrder {
        TradingOrder {
            id: 1,
            user_address: "0xabc".to_string(),
            execution_type: ExecutionType::Scheduled,
            side: OrderSide::Long,
            asset: "ETH".to_string(),
            usdc_size: dec!(1000),
            leverage: 1,
            slippage: None,
            twap,
            status: OrderStatus::Pending,
            external_txn_hash: None,
            created_at: t(0),
            updated_at: t(0),
        }
    }

    fn scheduler(trigger: Trigger, twap: Option<TwapProgress>) -> Scheduler {
        Scheduler {
            id: 5,
            trading_order_id: 1,
            user_address: "0xabc".to_string(),
            trigger,
            status: SchedulerStatus::Claimed,
            lease: None,
            last_executed_at: None,
            next_execution_at: t(0),
            fire_count: 0,
            twap,
            failure_reason: None,
            created_at: t(0),
            updated_at: t(0),
        }
    }

    #[test]
    fn test_plan_twap_continuation() {
        let dispatcher = dispatcher();
        let params = TwapParams {
            running_time_minutes: 60,
            randomize: false,
        };
        let progress = TwapProgress {
            slice_index: 1,
            slice_count: 4,
            seed: 11,
            started_at: Some(t(0)),
        };
        let row = scheduler(Trigger::AtTime { scheduled_at: t(0) }, Some(progress));

        let plan = dispatcher.plan_fire(&row, &order(Some(params)), t(15)).unwrap();
        assert_eq!(plan.size, dec!(250));
        assert!(!plan.completes_order);
        assert_eq!(
            plan.outcome,
            SchedulerOutcome::Rearm {
                next_execution_at: t(30),
                twap: Some(TwapProgress {
                    slice_index: 2,
                    ..progress
                }),
            }
        );

        let last = scheduler(
            Trigger::AtTime { scheduled_at: t(0) },
            Some(TwapProgress { slice_index: 3, ..progress }),
        );
        let plan = dispatcher.plan_fire(&last, &order(Some(params)), t(45)).unwrap();
        assert!(plan.completes_order);
    }

    #[test]
    fn test_plan_first_slice_sets_start() {
        let dispatcher = dispatcher();
        let params = TwapParams {
            running_time_minutes: 60,
            randomize: false,
        };
        let progress = TwapProgress {
            slice_index: 0,
            slice_count: 4,
            seed: 11,
            started_at: None,
        };
        let row = scheduler(Trigger::AtTime { scheduled_at: t(0) }, Some(progress));

        // first slice fired two minutes late: the run starts now
        let plan = dispatcher.plan_fire(&row, &order(Some(params)), t(2)).unwrap();
        match plan.outcome {
            SchedulerOutcome::Rearm { next_execution_at, twap } => {
                assert_eq!(next_execution_at, t(17));
                assert_eq!(twap.unwrap().started_at, Some(t(2)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_plan_malformed_cron_fails_before_placement() {
        let dispatcher = dispatcher();
        let row = scheduler(
            Trigger::Cron {
                expression: "61 * * * *".to_string(),
                timezone: chrono_tz::UTC,
            },
            None,
        );
        assert!(matches!(
            dispatcher.plan_fire(&row, &order(None), t(0)),
            Err(EngineError::CronResolution(_))
        ));
    }

    #[tokio::test]
    async fn test_limit_price_uses_default_slippage() {
        let dispatcher = dispatcher();
        let price = dispatcher.limit_price(&order(None)).await.unwrap();
        assert_eq!(price, dec!(108));

        let mut short = order(None);
        short.side = OrderSide::Short;
        short.slippage = Some(0.05);
        assert_eq!(dispatcher.limit_price(&short).await.unwrap(), dec!(95));
    }

    #[tokio::test]
    async fn test_execute_now_rejects_scheduled_orders() {
        let (stores, store) = Stores::in_memory();
        let dispatcher = Dispatcher::new(
            stores,
            Arc::new(Unused),
            Arc::new(FixedMarket),
            DispatcherSettings::default(),
        );
        let (created, _) = crate::repositories::OrderStore::create_order(
            store.as_ref(),
            NewOrder {
                user_address: "0xabc".to_string(),
                execution_type: ExecutionType::Scheduled,
                side: OrderSide::Long,
                asset: "ETH".to_string(),
                usdc_size: dec!(10),
                leverage: 1,
                slippage: None,
                twap: None,
            },
            Some(NewScheduler {
                trigger: Trigger::AtTime { scheduled_at: t(5) },
                next_execution_at: t(5),
                twap: None,
            }),
        )
        .await
        .unwrap();

        assert!(dispatcher.execute_now(created.id, t(0)).await.is_err());
    }
}
