//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "schedulers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub trading_order_id: u64,
    pub user_address: String,
    pub trigger_type: String, // "at_time", "cron", "advance"
    pub scheduled_at: Option<DateTimeUtc>,
    pub cron: Option<String>,
    pub timezone: Option<String>, // IANA name, e.g. "Asia/Ho_Chi_Minh"
    pub advance_metric: Option<String>, // "volume" or "open_interest"
    pub advance_direction: Option<String>, // "above" or "below"
    #[sea_orm(column_type = "Decimal(Some((30, 6)))", nullable)]
    pub advance_threshold: Option<Decimal>,
    pub advance_single_shot: Option<bool>,
    pub status: String, // "active", "claimed", "executed", "failed", "cancelled"
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTimeUtc>,
    pub last_executed_at: Option<DateTimeUtc>,
    pub next_execution_at: DateTimeUtc,
    pub fire_count: u32,
    pub twap_slice_index: Option<u32>,
    pub twap_slice_count: Option<u32>,
    pub twap_seed: Option<u64>,
    pub twap_started_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trading_orders::Entity",
        from = "Column::TradingOrderId",
        to = "super::trading_orders::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    TradingOrders,
}

impl Related<super::trading_orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TradingOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
