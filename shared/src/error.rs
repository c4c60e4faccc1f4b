//! Error taxonomy of the execution engine

use std::time::Duration;
use thiserror::Error;

use crate::models::OrderStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad price, slippage, size or schedule input. Rejected before any mutation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another dispatcher (or an overlapping cycle) holds the row.
    #[error("Scheduler {scheduler_id} is already claimed or no longer due")]
    ClaimConflict { scheduler_id: u64 },

    /// The venue rejected the order or the gateway call failed.
    #[error("Order placement failed: {0}")]
    Placement(String),

    #[error("Order placement timed out after {0:?}")]
    PlacementTimeout(Duration),

    #[error("Illegal order transition from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// Malformed or exhausted cron expression.
    #[error("Cron resolution failed: {0}")]
    CronResolution(String),

    #[error("Market data unavailable: {0}")]
    MarketData(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
}

impl EngineError {
    /// Placement failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Placement(_) | Self::PlacementTimeout(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
