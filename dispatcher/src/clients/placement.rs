//! Order placement clients

use async_trait::async_trait;
use serde::Deserialize;
use shared::error::{EngineError, EngineResult};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{OrderPlacementClient, PlacementReceipt, PlacementRequest};

/// Forwards placements to an execution gateway that signs and submits them
#[derive(Debug, Clone)]
pub struct HttpPlacementClient {
    gateway_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    txn_hash: Option<String>,
    error: Option<String>,
}

impl HttpPlacementClient {
    pub fn new(gateway_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Placement(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

fn receipt_from(response: GatewayResponse) -> EngineResult<PlacementReceipt> {
    match response {
        GatewayResponse { txn_hash: Some(txn_hash), .. } if !txn_hash.is_empty() => {
            Ok(PlacementReceipt { txn_hash })
        }
        GatewayResponse { error: Some(error), .. } => Err(EngineError::Placement(error)),
        _ => Err(EngineError::Placement("gateway response carried no txn_hash".to_string())),
    }
}

#[async_trait]
impl OrderPlacementClient for HttpPlacementClient {
    async fn place(&self, request: &PlacementRequest) -> EngineResult<PlacementReceipt> {
        let url = format!("{}/orders", self.gateway_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Placement(format!("gateway timed out: {}", e))
                } else {
                    EngineError::Placement(format!("gateway request failed: {}", e))
                }
            })?;

        let status = response.status();
        // 4xx is a rejection of this order, never retried
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::InvalidInput(format!(
                "gateway rejected {}: {} {}",
                request.client_order_id, status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Placement(format!("gateway returned {}: {}", status, body)));
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Placement(format!("invalid gateway response: {}", e)))?;
        receipt_from(body)
    }
}

/// Dry-run client: logs the order and answers with a generated hash
#[derive(Debug, Clone, Default)]
pub struct PaperPlacementClient;

#[async_trait]
impl OrderPlacementClient for PaperPlacementClient {
    async fn place(&self, request: &PlacementRequest) -> EngineResult<PlacementReceipt> {
        let txn_hash = format!("0x{}", Uuid::new_v4().simple());
        info!(
            "📝 Paper order {} for order {}: {} {} {} USDC x{} @ {} -> {}",
            request.client_order_id,
            request.order_id,
            request.side,
            request.asset,
            request.size,
            request.leverage,
            request.limit_price,
            txn_hash
        );
        Ok(PlacementReceipt { txn_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use shared::models::OrderSide;

    #[test]
    fn test_receipt_from_gateway_response() {
        let ok: GatewayResponse = serde_json::from_str(r#"{"txn_hash": "0xabc"}"#).unwrap();
        assert_eq!(receipt_from(ok).unwrap().txn_hash, "0xabc");

        let rejected: GatewayResponse = serde_json::from_str(r#"{"error": "insufficient margin"}"#).unwrap();
        assert!(matches!(receipt_from(rejected), Err(EngineError::Placement(e)) if e == "insufficient margin"));

        let empty: GatewayResponse = serde_json::from_str(r#"{"txn_hash": ""}"#).unwrap();
        assert!(receipt_from(empty).is_err());
    }

    #[tokio::test]
    async fn test_paper_client_returns_unique_hashes() {
        let request = PlacementRequest {
            order_id: 1,
            client_order_id: "sched-1-0".to_string(),
            asset: "BTC".to_string(),
            side: OrderSide::Short,
            size: dec!(50),
            leverage: 3,
            limit_price: dec!(61000),
        };
        let client = PaperPlacementClient;
        let a = client.place(&request).await.unwrap();
        let b = client.place(&request).await.unwrap();
        assert!(a.txn_hash.starts_with("0x"));
        assert_ne!(a.txn_hash, b.txn_hash);
    }
}
