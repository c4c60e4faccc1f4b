use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Schedulers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Schedulers::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(Schedulers::TradingOrderId).big_unsigned().not_null())
                    .col(ColumnDef::new(Schedulers::UserAddress).string_len(64).not_null()) // copied from the order for access checks
                    .col(ColumnDef::new(Schedulers::TriggerType).string().not_null()) // "at_time", "cron", "advance"
                    .col(ColumnDef::new(Schedulers::ScheduledAt).timestamp().null())
                    .col(ColumnDef::new(Schedulers::Cron).string().null())
                    .col(ColumnDef::new(Schedulers::Timezone).string().null())
                    .col(ColumnDef::new(Schedulers::AdvanceMetric).string().null()) // "volume" or "open_interest"
                    .col(ColumnDef::new(Schedulers::AdvanceDirection).string().null()) // "above" or "below"
                    .col(ColumnDef::new(Schedulers::AdvanceThreshold).decimal_len(30, 6).null())
                    .col(ColumnDef::new(Schedulers::AdvanceSingleShot).boolean().null())
                    .col(ColumnDef::new(Schedulers::Status).string().not_null().default("active"))
                    .col(ColumnDef::new(Schedulers::LastExecutedAt).timestamp().null())
                    .col(ColumnDef::new(Schedulers::NextExecutionAt).timestamp().not_null())
                    .col(ColumnDef::new(Schedulers::FireCount).unsigned().not_null().default(0))
                    .col(ColumnDef::new(Schedulers::TwapSliceIndex).unsigned().null())
                    .col(ColumnDef::new(Schedulers::TwapSliceCount).unsigned().null())
                    .col(ColumnDef::new(Schedulers::TwapSeed).big_unsigned().null())
                    .col(ColumnDef::new(Schedulers::TwapStartedAt).timestamp().null())
                    .col(ColumnDef::new(Schedulers::FailureReason).text().null())
                    .col(ColumnDef::new(Schedulers::CreatedAt).timestamp().not_null().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Schedulers::UpdatedAt).timestamp().not_null().default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_schedulers_order")
                            .table(Schedulers::Table)
                            .col(Schedulers::TradingOrderId)
                    )
                    .index(
                        Index::create()
                            .name("idx_schedulers_user_status")
                            .table(Schedulers::Table)
                            .col(Schedulers::UserAddress)
                            .col(Schedulers::Status)
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_schedulers_trading_order")
                            .from(Schedulers::Table, Schedulers::TradingOrderId)
                            .to(TradingOrders::Table, TradingOrders::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Schedulers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Schedulers {
    Table,
    Id,
    TradingOrderId,
    UserAddress,
    TriggerType,
    ScheduledAt,
    Cron,
    Timezone,
    AdvanceMetric,
    AdvanceDirection,
    AdvanceThreshold,
    AdvanceSingleShot,
    Status,
    LastExecutedAt,
    NextExecutionAt,
    FireCount,
    TwapSliceIndex,
    TwapSliceCount,
    TwapSeed,
    TwapStartedAt,
    FailureReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TradingOrders {
    Table,
    Id,
}
