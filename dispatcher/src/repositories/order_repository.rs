use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use shared::entity::{schedulers, trading_orders};
use shared::models::{
    NewOrder, NewScheduler, OrderStatus, Scheduler, SchedulerStatus, TradingOrder, TriggerColumns,
};

use super::{OrderStore, SeaOrmStore};
use crate::services::order_state;

fn order_active_model(order: &NewOrder, now: chrono::DateTime<Utc>) -> Result<trading_orders::ActiveModel> {
    let slippage = match order.slippage {
        Some(s) => Some(Decimal::from_f64(s).ok_or_else(|| anyhow!("slippage {} is not representable", s))?),
        None => None,
    };

    Ok(trading_orders::ActiveModel {
        user_address: ActiveValue::Set(order.user_address.clone()),
        execution_type: ActiveValue::Set(order.execution_type.as_str().to_string()),
        side: ActiveValue::Set(order.side.as_str().to_string()),
        is_twap: ActiveValue::Set(order.twap.is_some()),
        asset: ActiveValue::Set(order.asset.clone()),
        usdc_size: ActiveValue::Set(order.usdc_size),
        leverage: ActiveValue::Set(order.leverage),
        slippage: ActiveValue::Set(slippage),
        twap_running_time: ActiveValue::Set(order.twap.map(|t| t.running_time_minutes)),
        twap_randomize: ActiveValue::Set(order.twap.map(|t| t.randomize)),
        status: ActiveValue::Set(OrderStatus::Pending.as_str().to_string()),
        external_txn_hash: ActiveValue::Set(None),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
        ..Default::default()
    })
}

fn scheduler_active_model(
    scheduler: &NewScheduler,
    order: &trading_orders::Model,
    now: chrono::DateTime<Utc>,
) -> schedulers::ActiveModel {
    let columns = TriggerColumns::from(&scheduler.trigger);
    let twap = scheduler.twap;

    schedulers::ActiveModel {
        trading_order_id: ActiveValue::Set(order.id),
        user_address: ActiveValue::Set(order.user_address.clone()),
        trigger_type: ActiveValue::Set(columns.trigger_type),
        scheduled_at: ActiveValue::Set(columns.scheduled_at),
        cron: ActiveValue::Set(columns.cron),
        timezone: ActiveValue::Set(columns.timezone),
        advance_metric: ActiveValue::Set(columns.advance_metric),
        advance_direction: ActiveValue::Set(columns.advance_direction),
        advance_threshold: ActiveValue::Set(columns.advance_threshold),
        advance_single_shot: ActiveValue::Set(columns.advance_single_shot),
        status: ActiveValue::Set(SchedulerStatus::Active.as_str().to_string()),
        lease_owner: ActiveValue::Set(None),
        lease_expires_at: ActiveValue::Set(None),
        last_executed_at: ActiveValue::Set(None),
        next_execution_at: ActiveValue::Set(scheduler.next_execution_at),
        fire_count: ActiveValue::Set(0),
        twap_slice_index: ActiveValue::Set(twap.map(|t| t.slice_index)),
        twap_slice_count: ActiveValue::Set(twap.map(|t| t.slice_count)),
        twap_seed: ActiveValue::Set(twap.map(|t| t.seed)),
        twap_started_at: ActiveValue::Set(twap.and_then(|t| t.started_at)),
        failure_reason: ActiveValue::Set(None),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
        ..Default::default()
    }
}

/// Conditional status update of one order row, usable inside a transaction
pub(super) async fn update_order_row<C: sea_orm::ConnectionTrait>(
    conn: &C,
    id: u64,
    expected: OrderStatus,
    status: OrderStatus,
    txn_hash: Option<String>,
    now: chrono::DateTime<Utc>,
) -> Result<bool> {
    order_state::transition(expected, status)?;

    let mut update = trading_orders::Entity::update_many()
        .col_expr(trading_orders::Column::Status, Expr::value(status.as_str()))
        .col_expr(trading_orders::Column::UpdatedAt, Expr::value(now));
    if let Some(hash) = txn_hash {
        update = update.col_expr(trading_orders::Column::ExternalTxnHash, Expr::value(hash));
    }

    let result = update
        .filter(trading_orders::Column::Id.eq(id))
        .filter(trading_orders::Column::Status.eq(expected.as_str()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

#[async_trait]
impl OrderStore for SeaOrmStore {
    async fn create_order(
        &self,
        order: NewOrder,
        scheduler: Option<NewScheduler>,
    ) -> Result<(TradingOrder, Option<Scheduler>)> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order_row = trading_orders::Entity::insert(order_active_model(&order, now)?)
            .exec_with_returning(&txn)
            .await?;

        let scheduler_row = match &scheduler {
            Some(new) => Some(
                schedulers::Entity::insert(scheduler_active_model(new, &order_row, now))
                    .exec_with_returning(&txn)
                    .await?,
            ),
            None => None,
        };

        txn.commit().await?;

        let scheduler = scheduler_row.map(Scheduler::try_from).transpose()?;
        Ok((TradingOrder::try_from(order_row)?, scheduler))
    }

    async fn get_order(&self, id: u64) -> Result<Option<TradingOrder>> {
        let row = trading_orders::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(row.map(TradingOrder::try_from).transpose()?)
    }

    async fn update_order_status(
        &self,
        id: u64,
        expected: OrderStatus,
        status: OrderStatus,
        txn_hash: Option<String>,
    ) -> Result<bool> {
        update_order_row(self.db.as_ref(), id, expected, status, txn_hash, Utc::now()).await
    }
}
