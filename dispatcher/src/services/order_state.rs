//! Trading order lifecycle
//!
//! ```text
//! PENDING ──> EXECUTING ──> EXECUTED
//!    │           │  ↺ ──────> FAILED
//!    │           └──────────> CANCELLED
//!    ├──> CANCELLED
//!    └──> FAILED
//! ```
//!
//! `EXECUTING -> EXECUTING` covers TWAP slices and recurring fires. Terminal
//! states accept nothing.

use shared::error::{EngineError, EngineResult};
use shared::models::OrderStatus;

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Executing)
            | (Pending, Cancelled)
            | (Pending, Failed)
            | (Executing, Executing)
            | (Executing, Executed)
            | (Executing, Failed)
            | (Executing, Cancelled)
    )
}

/// Validate `from -> to`, returning the new status
pub fn transition(from: OrderStatus, to: OrderStatus) -> EngineResult<OrderStatus> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}
