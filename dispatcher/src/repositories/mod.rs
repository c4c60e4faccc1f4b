//! Persistence seams for orders and schedulers
//!
//! Every write is a conditional single-row update, except `commit_fire`,
//! `cancel` and `create_order`, which touch both tables in one transaction.

pub mod memory;
pub mod order_repository;
pub mod scheduler_repository;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use shared::models::{
    NewOrder, NewScheduler, OrderStatus, Scheduler, SchedulerStatus, TradingOrder, TwapProgress,
};
use std::sync::Arc;

pub use memory::InMemoryStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order and, for scheduled orders, its scheduler row
    async fn create_order(
        &self,
        order: NewOrder,
        scheduler: Option<NewScheduler>,
    ) -> Result<(TradingOrder, Option<Scheduler>)>;

    async fn get_order(&self, id: u64) -> Result<Option<TradingOrder>>;

    /// Move an order from `expected` to `status`. Returns false when the row
    /// is no longer in `expected`. Illegal transitions are rejected before
    /// anything is written.
    async fn update_order_status(
        &self,
        id: u64,
        expected: OrderStatus,
        status: OrderStatus,
        txn_hash: Option<String>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<Scheduler>>;

    /// Active rows due at `now` and claimed rows whose lease has expired,
    /// oldest due first
    async fn list_due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Scheduler>>;

    /// Take the lease on a claimable row. Exactly one concurrent caller wins.
    async fn try_claim(
        &self,
        id: u64,
        now: DateTime<Utc>,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Hand a claimed row back as `ACTIVE` without changing its schedule.
    /// No-op unless `owner` holds the claim.
    async fn release_claim(&self, id: u64, owner: &str) -> Result<bool>;

    /// Record the result of a fire. Returns false, writing nothing, when
    /// `owner` no longer holds the claim.
    async fn commit_fire(&self, commit: FireCommit) -> Result<bool>;

    /// Cancel an armed row and its order
    async fn cancel(&self, id: u64, now: DateTime<Utc>) -> Result<CancelOutcome>;
}

/// Order side of a fire commit
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTransition {
    pub expected: OrderStatus,
    pub status: OrderStatus,
    /// Replaces the stored hash when set
    pub txn_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerOutcome {
    /// Back to `ACTIVE`, due again at `next_execution_at`
    Rearm {
        next_execution_at: DateTime<Utc>,
        twap: Option<TwapProgress>,
    },
    Terminal {
        status: SchedulerStatus,
        failure_reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FireCommit {
    pub scheduler_id: u64,
    pub owner: String,
    pub now: DateTime<Utc>,
    /// Set when an order was placed; bumps `fire_count` and `last_executed_at`
    pub executed_at: Option<DateTime<Utc>>,
    pub order_id: u64,
    pub order: Option<OrderTransition>,
    pub outcome: SchedulerOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Held by a dispatcher right now; retry after the claim is released
    Executing,
    AlreadyTerminal(SchedulerStatus),
    NotFound,
}

/// MySQL-backed store for both tables
#[derive(Clone)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

/// Both stores behind one handle, as wired by the binary
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub schedulers: Arc<dyn SchedulerStore>,
}

impl Stores {
    pub fn sea_orm(db: Arc<DatabaseConnection>) -> Self {
        let store = Arc::new(SeaOrmStore::new(db));
        Self {
            orders: store.clone(),
            schedulers: store,
        }
    }

    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            Self {
                orders: store.clone(),
                schedulers: store.clone(),
            },
            store,
        )
    }
}
