pub use sea_orm_migration::prelude::*;

mod m20251201_000001_create_trading_orders;
mod m20251201_000002_create_schedulers;
mod m20251204_000001_add_scheduler_lease;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251201_000001_create_trading_orders::Migration),
            Box::new(m20251201_000002_create_schedulers::Migration),
            Box::new(m20251204_000001_add_scheduler_lease::Migration),
        ]
    }
}
