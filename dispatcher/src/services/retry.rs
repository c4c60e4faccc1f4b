//! Placement with per-attempt timeout and bounded exponential backoff

use shared::config::RetrySettings;
use shared::error::{EngineError, EngineResult};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clients::{OrderPlacementClient, PlacementReceipt, PlacementRequest};

/// Place `request`, retrying transient failures.
///
/// Each attempt runs under `attempt_timeout`. Rejections that are not
/// retryable end the sequence at once. After `max_attempts` the last error is
/// returned.
pub async fn place_with_retry(
    client: &dyn OrderPlacementClient,
    request: &PlacementRequest,
    attempt_timeout: Duration,
    retry: &RetrySettings,
) -> EngineResult<PlacementReceipt> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match tokio::time::timeout(attempt_timeout, client.place(request)).await {
            Ok(Ok(receipt)) => {
                debug!(
                    "Placed {} on attempt {}: {}",
                    request.client_order_id, attempt, receipt.txn_hash
                );
                return Ok(receipt);
            }
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => EngineError::PlacementTimeout(attempt_timeout),
        };

        if attempt >= max_attempts {
            warn!(
                "Placement of {} gave up after {} attempts: {}",
                request.client_order_id, attempt, error
            );
            return Err(error);
        }

        let delay = retry.delay_after(attempt);
        warn!(
            "Placement attempt {}/{} for {} failed: {}, retrying in {:?}",
            attempt, max_attempts, request.client_order_id, error, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
