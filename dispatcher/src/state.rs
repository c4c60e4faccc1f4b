use migration::{Migrator, MigratorTrait};
use shared::{get_db_connection, Config, PlacementMode, StoreBackend};
use std::sync::Arc;
use tracing::info;

use crate::clients::{
    HttpPlacementClient, HyperliquidInfoClient, MarketSnapshotProvider, OrderPlacementClient,
    PaperPlacementClient,
};
use crate::repositories::Stores;
use crate::services::{Dispatcher, OrderIntake};

/// Everything the binary wires together from configuration
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub placement: Arc<dyn OrderPlacementClient>,
    pub market: Arc<dyn MarketSnapshotProvider>,
    pub dispatcher: Arc<Dispatcher>,
    pub intake: Arc<OrderIntake>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let stores = match config.store_backend {
            StoreBackend::Mysql => {
                let db = get_db_connection(&config.database_url).await?;
                info!("Connected to database successfully");
                if config.run_migrations {
                    Migrator::up(&db, None).await?;
                    info!("Database migrations applied");
                }
                Stores::sea_orm(Arc::new(db))
            }
            StoreBackend::Memory => {
                info!("Using in-memory store, nothing survives a restart");
                Stores::in_memory().0
            }
        };

        let settings = &config.dispatcher;
        let market: Arc<dyn MarketSnapshotProvider> = Arc::new(HyperliquidInfoClient::new(
            config.market_data_url.clone(),
            settings.market_data_timeout,
        )?);

        let placement: Arc<dyn OrderPlacementClient> = match (config.placement_mode, &config.placement_gateway_url) {
            (PlacementMode::Http, Some(url)) => {
                info!("Placing orders through gateway {}", url);
                Arc::new(HttpPlacementClient::new(url.clone(), settings.placement_timeout)?)
            }
            (PlacementMode::Http, None) => {
                anyhow::bail!("PLACEMENT_GATEWAY_URL is required when PLACEMENT_MODE=http")
            }
            (PlacementMode::Paper, _) => {
                info!("📝 Paper placement mode, no orders reach the venue");
                Arc::new(PaperPlacementClient)
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            stores.clone(),
            placement.clone(),
            market.clone(),
            settings.clone(),
        ));
        let intake = Arc::new(OrderIntake::new(stores.orders.clone(), settings.clone()));

        Ok(AppState {
            stores,
            placement,
            market,
            dispatcher,
            intake,
        })
    }
}
