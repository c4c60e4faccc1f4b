//! Market snapshot reads over the Hyperliquid public info endpoint

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::error::{EngineError, EngineResult};
use shared::models::MarketMetric;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::MarketSnapshotProvider;

#[derive(Debug, Deserialize)]
struct UniverseMeta {
    universe: Vec<AssetMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMeta {
    name: String,
    sz_decimals: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetCtx {
    /// 24h notional volume
    day_ntl_vlm: String,
    open_interest: String,
}

/// `metaAndAssetCtxs` answers with `[meta, ctxs]`, index-aligned by asset
type MetaAndAssetCtxs = (UniverseMeta, Vec<AssetCtx>);

#[derive(Debug, Clone)]
pub struct HyperliquidInfoClient {
    base_url: String,
    client: reqwest::Client,
}

impl HyperliquidInfoClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::MarketData(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn info<T: serde::de::DeserializeOwned>(&self, request_type: &str) -> EngineResult<T> {
        let url = format!("{}/info", self.base_url);
        debug!("POST {} type={}", url, request_type);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "type": request_type }))
            .send()
            .await
            .map_err(|e| EngineError::MarketData(format!("{} request failed: {}", request_type, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::MarketData(format!(
                "{} returned {}: {}",
                request_type, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::MarketData(format!("invalid {} response: {}", request_type, e)))
    }
}

fn parse_figure(asset: &str, field: &str, raw: &str) -> EngineResult<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EngineError::MarketData(format!("{} {} is not a number: '{}'", asset, field, raw)))
}

fn mid_price(mids: &HashMap<String, String>, asset: &str) -> EngineResult<f64> {
    let raw = mids
        .get(asset)
        .ok_or_else(|| EngineError::MarketData(format!("no mid price for {}", asset)))?;
    parse_figure(asset, "mid", raw)
}

fn find_asset<'a>(data: &'a MetaAndAssetCtxs, asset: &str) -> EngineResult<(&'a AssetMeta, &'a AssetCtx)> {
    let (meta, ctxs) = data;
    meta.universe
        .iter()
        .position(|m| m.name == asset)
        .and_then(|i| Some((meta.universe.get(i)?, ctxs.get(i)?)))
        .ok_or_else(|| EngineError::MarketData(format!("unknown asset {}", asset)))
}

fn metric_figure(data: &MetaAndAssetCtxs, asset: &str, metric: MarketMetric) -> EngineResult<f64> {
    let (_, ctx) = find_asset(data, asset)?;
    match metric {
        MarketMetric::Volume => parse_figure(asset, "dayNtlVlm", &ctx.day_ntl_vlm),
        MarketMetric::OpenInterest => parse_figure(asset, "openInterest", &ctx.open_interest),
    }
}

#[async_trait]
impl MarketSnapshotProvider for HyperliquidInfoClient {
    async fn get_price(&self, asset: &str) -> EngineResult<f64> {
        let mids: HashMap<String, String> = self.info("allMids").await?;
        mid_price(&mids, asset)
    }

    async fn get_volume_or_oi(&self, asset: &str, metric: MarketMetric) -> EngineResult<f64> {
        let data: MetaAndAssetCtxs = self.info("metaAndAssetCtxs").await?;
        metric_figure(&data, asset, metric)
    }

    async fn get_tick_precision(&self, asset: &str) -> EngineResult<u32> {
        let data: MetaAndAssetCtxs = self.info("metaAndAssetCtxs").await?;
        let (meta, _) = find_asset(&data, asset)?;
        Ok(meta.sz_decimals)
    }
}
