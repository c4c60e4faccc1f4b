//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "trading_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub user_address: String,
    pub execution_type: String, // "immediate", "scheduled", "advance_trigger"
    pub side: String, // "long" or "short"
    pub is_twap: bool,
    pub asset: String, // "BTC", "ETH", ...
    #[sea_orm(column_type = "Decimal(Some((20, 6)))")]
    pub usdc_size: Decimal,
    pub leverage: u32,
    #[sea_orm(column_type = "Decimal(Some((10, 6)))", nullable)]
    pub slippage: Option<Decimal>,
    pub twap_running_time: Option<u32>, // minutes
    pub twap_randomize: Option<bool>,
    pub status: String, // "pending", "executing", "executed", "failed", "cancelled"
    #[sea_orm(column_type = "Text", nullable)]
    pub external_txn_hash: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::schedulers::Entity")]
    Schedulers,
}

impl Related<super::schedulers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Schedulers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
