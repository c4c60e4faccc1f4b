//! In-process store with the same conditional-update semantics as the
//! database store. Used by the `memory` backend and by tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Lease, NewOrder, NewScheduler, OrderStatus, Scheduler, SchedulerStatus, TradingOrder,
};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{CancelOutcome, FireCommit, OrderStore, SchedulerOutcome, SchedulerStore};
use crate::services::order_state;

#[derive(Default)]
struct Tables {
    orders: BTreeMap<u64, TradingOrder>,
    schedulers: BTreeMap<u64, Scheduler>,
    next_order_id: u64,
    next_scheduler_id: u64,
}

/// Both tables behind one lock, so multi-row writes are atomic
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Conditional order update shared by the order and scheduler paths
fn apply_order_status(
    order: &mut TradingOrder,
    expected: OrderStatus,
    status: OrderStatus,
    txn_hash: Option<String>,
    now: DateTime<Utc>,
) -> Result<bool> {
    order_state::transition(expected, status)?;
    if order.status != expected {
        return Ok(false);
    }
    order.status = status;
    if txn_hash.is_some() {
        order.external_txn_hash = txn_hash;
    }
    order.updated_at = now;
    Ok(true)
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(
        &self,
        order: NewOrder,
        scheduler: Option<NewScheduler>,
    ) -> Result<(TradingOrder, Option<Scheduler>)> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        tables.next_order_id += 1;
        let order = TradingOrder {
            id: tables.next_order_id,
            user_address: order.user_address,
            execution_type: order.execution_type,
            side: order.side,
            asset: order.asset,
            usdc_size: order.usdc_size,
            leverage: order.leverage,
            slippage: order.slippage,
            twap: order.twap,
            status: OrderStatus::Pending,
            external_txn_hash: None,
            created_at: now,
            updated_at: now,
        };

        let scheduler = scheduler.map(|new| {
            tables.next_scheduler_id += 1;
            Scheduler {
                id: tables.next_scheduler_id,
                trading_order_id: order.id,
                user_address: order.user_address.clone(),
                trigger: new.trigger,
                status: SchedulerStatus::Active,
                lease: None,
                last_executed_at: None,
                next_execution_at: new.next_execution_at,
                fire_count: 0,
                twap: new.twap,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            }
        });

        tables.orders.insert(order.id, order.clone());
        if let Some(scheduler) = &scheduler {
            tables.schedulers.insert(scheduler.id, scheduler.clone());
        }
        Ok((order, scheduler))
    }

    async fn get_order(&self, id: u64) -> Result<Option<TradingOrder>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn update_order_status(
        &self,
        id: u64,
        expected: OrderStatus,
        status: OrderStatus,
        txn_hash: Option<String>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.orders.get_mut(&id) {
            Some(order) => apply_order_status(order, expected, status, txn_hash, Utc::now()),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    async fn get(&self, id: u64) -> Result<Option<Scheduler>> {
        Ok(self.tables.lock().await.schedulers.get(&id).cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Scheduler>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<Scheduler> = tables
            .schedulers
            .values()
            .filter(|s| s.is_claimable(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.next_execution_at, s.id));
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn try_claim(
        &self,
        id: u64,
        now: DateTime<Utc>,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(scheduler) = tables.schedulers.get_mut(&id) else {
            return Ok(false);
        };
        if !scheduler.is_claimable(now) {
            return Ok(false);
        }
        scheduler.status = SchedulerStatus::Claimed;
        scheduler.lease = Some(Lease {
            owner: owner.to_string(),
            expires_at,
        });
        scheduler.updated_at = now;
        Ok(true)
    }

    async fn release_claim(&self, id: u64, owner: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.schedulers.get_mut(&id) {
            Some(scheduler) if scheduler.is_claimed_by(owner) => {
                scheduler.status = SchedulerStatus::Active;
                scheduler.lease = None;
                scheduler.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_fire(&self, commit: FireCommit) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;

        let Some(scheduler) = tables.schedulers.get_mut(&commit.scheduler_id) else {
            return Ok(false);
        };
        if !scheduler.is_claimed_by(&commit.owner) {
            return Ok(false);
        }

        // validate the order side before touching either row
        if let Some(transition) = &commit.order {
            order_state::transition(transition.expected, transition.status)?;
            let order = tables
                .orders
                .get(&commit.order_id)
                .ok_or_else(|| anyhow!("order {} not found", commit.order_id))?;
            if order.status != transition.expected {
                return Ok(false);
            }
        }

        if let Some(transition) = commit.order {
            if let Some(order) = tables.orders.get_mut(&commit.order_id) {
                apply_order_status(
                    order,
                    transition.expected,
                    transition.status,
                    transition.txn_hash,
                    commit.now,
                )?;
            }
        }

        scheduler.lease = None;
        scheduler.updated_at = commit.now;
        if let Some(executed_at) = commit.executed_at {
            scheduler.last_executed_at = Some(executed_at);
            scheduler.fire_count += 1;
        }
        match commit.outcome {
            SchedulerOutcome::Rearm { next_execution_at, twap } => {
                scheduler.status = SchedulerStatus::Active;
                scheduler.next_execution_at = next_execution_at;
                scheduler.twap = twap;
            }
            SchedulerOutcome::Terminal { status, failure_reason } => {
                scheduler.status = status;
                scheduler.failure_reason = failure_reason;
            }
        }
        Ok(true)
    }

    async fn cancel(&self, id: u64, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;

        let Some(scheduler) = tables.schedulers.get_mut(&id) else {
            return Ok(CancelOutcome::NotFound);
        };
        match scheduler.status {
            SchedulerStatus::Active => {}
            SchedulerStatus::Claimed => return Ok(CancelOutcome::Executing),
            terminal => return Ok(CancelOutcome::AlreadyTerminal(terminal)),
        }

        scheduler.status = SchedulerStatus::Cancelled;
        scheduler.lease = None;
        scheduler.updated_at = now;

        if let Some(order) = tables.orders.get_mut(&scheduler.trading_order_id) {
            if order_state::can_transition(order.status, OrderStatus::Cancelled) {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
            }
        }
        Ok(CancelOutcome::Cancelled)
    }
}
