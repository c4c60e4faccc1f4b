use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TradingOrders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TradingOrders::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(TradingOrders::UserAddress).string_len(64).not_null())
                    .col(ColumnDef::new(TradingOrders::ExecutionType).string().not_null()) // "immediate", "scheduled", "advance_trigger"
                    .col(ColumnDef::new(TradingOrders::Side).string().not_null()) // "long" or "short"
                    .col(ColumnDef::new(TradingOrders::IsTwap).boolean().not_null().default(false))
                    .col(ColumnDef::new(TradingOrders::Asset).string().not_null())
                    .col(ColumnDef::new(TradingOrders::UsdcSize).decimal_len(20, 6).not_null())
                    .col(ColumnDef::new(TradingOrders::Leverage).unsigned().not_null().default(1))
                    .col(ColumnDef::new(TradingOrders::Slippage).decimal_len(10, 6).null())
                    .col(ColumnDef::new(TradingOrders::TwapRunningTime).unsigned().null()) // minutes, only for TWAP orders
                    .col(ColumnDef::new(TradingOrders::TwapRandomize).boolean().null())
                    .col(ColumnDef::new(TradingOrders::Status).string().not_null().default("pending"))
                    .col(ColumnDef::new(TradingOrders::ExternalTxnHash).text().null()) // set once placed on the venue
                    .col(ColumnDef::new(TradingOrders::CreatedAt).timestamp().not_null().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(TradingOrders::UpdatedAt).timestamp().not_null().default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_trading_orders_user_status")
                            .table(TradingOrders::Table)
                            .col(TradingOrders::UserAddress)
                            .col(TradingOrders::Status)
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TradingOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TradingOrders {
    Table,
    Id,
    UserAddress,
    ExecutionType,
    Side,
    IsTwap,
    Asset,
    UsdcSize,
    Leverage,
    Slippage,
    TwapRunningTime,
    TwapRandomize,
    Status,
    ExternalTxnHash,
    CreatedAt,
    UpdatedAt,
}
