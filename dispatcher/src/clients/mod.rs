//! Outbound collaborators: the venue placement path and the market snapshot read

pub mod market_data;
pub mod placement;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::error::EngineResult;
use shared::models::{MarketMetric, OrderSide};

pub use market_data::HyperliquidInfoClient;
pub use placement::{HttpPlacementClient, PaperPlacementClient};

/// One order placement, as sent to the venue gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub order_id: u64,
    /// Deterministic per fire, so a retried or reclaimed fire can be deduplicated
    pub client_order_id: String,
    pub asset: String,
    pub side: OrderSide,
    /// USDC notional of this fire
    pub size: Decimal,
    pub leverage: u32,
    pub limit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementReceipt {
    pub txn_hash: String,
}

#[async_trait]
pub trait OrderPlacementClient: Send + Sync {
    async fn place(&self, request: &PlacementRequest) -> EngineResult<PlacementReceipt>;
}

#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    /// Reference (mid) price of `asset`
    async fn get_price(&self, asset: &str) -> EngineResult<f64>;

    async fn get_volume_or_oi(&self, asset: &str, metric: MarketMetric) -> EngineResult<f64>;

    /// Size decimals of `asset`; prices may carry `6 - precision` decimals
    async fn get_tick_precision(&self, asset: &str) -> EngineResult<u32>;
}
