use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use shared::entity::{schedulers, trading_orders};
use shared::models::{OrderStatus, Scheduler, SchedulerStatus};
use tracing::debug;

use super::order_repository::update_order_row;
use super::{CancelOutcome, FireCommit, SchedulerOutcome, SchedulerStore, SeaOrmStore};
use crate::services::order_state;

/// Rows a dispatcher may claim at `now`
fn claimable(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(
            Condition::all()
                .add(schedulers::Column::Status.eq(SchedulerStatus::Active.as_str()))
                .add(schedulers::Column::NextExecutionAt.lte(now)),
        )
        .add(
            Condition::all()
                .add(schedulers::Column::Status.eq(SchedulerStatus::Claimed.as_str()))
                .add(
                    Condition::any()
                        .add(schedulers::Column::LeaseExpiresAt.lt(now))
                        .add(schedulers::Column::LeaseExpiresAt.is_null()),
                ),
        )
}

fn held_by(id: u64, owner: &str) -> Condition {
    Condition::all()
        .add(schedulers::Column::Id.eq(id))
        .add(schedulers::Column::Status.eq(SchedulerStatus::Claimed.as_str()))
        .add(schedulers::Column::LeaseOwner.eq(owner))
}

#[async_trait]
impl SchedulerStore for SeaOrmStore {
    async fn get(&self, id: u64) -> Result<Option<Scheduler>> {
        let row = schedulers::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(row.map(Scheduler::try_from).transpose()?)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Scheduler>> {
        let rows = schedulers::Entity::find()
            .filter(claimable(now))
            .order_by_asc(schedulers::Column::NextExecutionAt)
            .order_by_asc(schedulers::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            due.push(Scheduler::try_from(row)?);
        }
        Ok(due)
    }

    async fn try_claim(
        &self,
        id: u64,
        now: DateTime<Utc>,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = schedulers::Entity::update_many()
            .col_expr(schedulers::Column::Status, Expr::value(SchedulerStatus::Claimed.as_str()))
            .col_expr(schedulers::Column::LeaseOwner, Expr::value(owner))
            .col_expr(schedulers::Column::LeaseExpiresAt, Expr::value(expires_at))
            .col_expr(schedulers::Column::UpdatedAt, Expr::value(now))
            .filter(schedulers::Column::Id.eq(id))
            .filter(claimable(now))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn release_claim(&self, id: u64, owner: &str) -> Result<bool> {
        let result = schedulers::Entity::update_many()
            .col_expr(schedulers::Column::Status, Expr::value(SchedulerStatus::Active.as_str()))
            .col_expr(schedulers::Column::LeaseOwner, Expr::value(Option::<String>::None))
            .col_expr(schedulers::Column::LeaseExpiresAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(schedulers::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(held_by(id, owner))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn commit_fire(&self, commit: FireCommit) -> Result<bool> {
        let txn = self.db.begin().await?;

        if let Some(transition) = commit.order.clone() {
            let updated = update_order_row(
                &txn,
                commit.order_id,
                transition.expected,
                transition.status,
                transition.txn_hash,
                commit.now,
            )
            .await?;
            if !updated {
                debug!(
                    "Order {} is no longer {}, dropping fire of scheduler {}",
                    commit.order_id, transition.expected, commit.scheduler_id
                );
                txn.rollback().await?;
                return Ok(false);
            }
        }

        let mut update = schedulers::Entity::update_many()
            .col_expr(schedulers::Column::LeaseOwner, Expr::value(Option::<String>::None))
            .col_expr(schedulers::Column::LeaseExpiresAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(schedulers::Column::UpdatedAt, Expr::value(commit.now));

        if let Some(executed_at) = commit.executed_at {
            update = update
                .col_expr(schedulers::Column::LastExecutedAt, Expr::value(executed_at))
                .col_expr(
                    schedulers::Column::FireCount,
                    Expr::col(schedulers::Column::FireCount).add(1),
                );
        }

        update = match commit.outcome {
            SchedulerOutcome::Rearm { next_execution_at, twap } => update
                .col_expr(schedulers::Column::Status, Expr::value(SchedulerStatus::Active.as_str()))
                .col_expr(schedulers::Column::NextExecutionAt, Expr::value(next_execution_at))
                .col_expr(schedulers::Column::TwapSliceIndex, Expr::value(twap.map(|t| t.slice_index)))
                .col_expr(schedulers::Column::TwapSliceCount, Expr::value(twap.map(|t| t.slice_count)))
                .col_expr(schedulers::Column::TwapSeed, Expr::value(twap.map(|t| t.seed)))
                .col_expr(
                    schedulers::Column::TwapStartedAt,
                    Expr::value(twap.and_then(|t| t.started_at)),
                ),
            SchedulerOutcome::Terminal { status, failure_reason } => update
                .col_expr(schedulers::Column::Status, Expr::value(status.as_str()))
                .col_expr(schedulers::Column::FailureReason, Expr::value(failure_reason)),
        };

        let result = update
            .filter(held_by(commit.scheduler_id, &commit.owner))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            debug!(
                "Scheduler {} is no longer held by {}, rolling back",
                commit.scheduler_id, commit.owner
            );
            txn.rollback().await?;
            return Ok(false);
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn cancel(&self, id: u64, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let txn = self.db.begin().await?;

        let result = schedulers::Entity::update_many()
            .col_expr(schedulers::Column::Status, Expr::value(SchedulerStatus::Cancelled.as_str()))
            .col_expr(schedulers::Column::UpdatedAt, Expr::value(now))
            .filter(schedulers::Column::Id.eq(id))
            .filter(schedulers::Column::Status.eq(SchedulerStatus::Active.as_str()))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            txn.rollback().await?;
            let outcome = match self.get(id).await? {
                None => CancelOutcome::NotFound,
                Some(row) if row.status == SchedulerStatus::Claimed => CancelOutcome::Executing,
                // re-armed between the update and the read: report as in flight
                Some(row) if row.status == SchedulerStatus::Active => CancelOutcome::Executing,
                Some(row) => CancelOutcome::AlreadyTerminal(row.status),
            };
            return Ok(outcome);
        }

        let scheduler = schedulers::Entity::find_by_id(id).one(&txn).await?;
        if let Some(scheduler) = scheduler {
            let order = trading_orders::Entity::find_by_id(scheduler.trading_order_id)
                .one(&txn)
                .await?;
            if let Some(order) = order {
                let current: OrderStatus = order.status.parse()?;
                if order_state::can_transition(current, OrderStatus::Cancelled) {
                    update_order_row(&txn, order.id, current, OrderStatus::Cancelled, None, now).await?;
                }
            }
        }

        txn.commit().await?;
        Ok(CancelOutcome::Cancelled)
    }
}
