use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Lease columns for claiming rows across dispatcher instances
        manager
            .alter_table(
                Table::alter()
                    .table(Schedulers::Table)
                    .add_column(ColumnDef::new(Schedulers::LeaseOwner).string().null())
                    .add_column(ColumnDef::new(Schedulers::LeaseExpiresAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        // Poll query: status = 'active' AND next_execution_at <= now ORDER BY next_execution_at, id
        manager
            .create_index(
                Index::create()
                    .name("idx_schedulers_status_next")
                    .table(Schedulers::Table)
                    .col(Schedulers::Status)
                    .col(Schedulers::NextExecutionAt)
                    .col(Schedulers::Id)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_schedulers_status_next")
                    .table(Schedulers::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Schedulers::Table)
                    .drop_column(Schedulers::LeaseOwner)
                    .drop_column(Schedulers::LeaseExpiresAt)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Schedulers {
    Table,
    Id,
    Status,
    NextExecutionAt,
    LeaseOwner,
    LeaseExpiresAt,
}
