//! TWAP slicing
//!
//! Splits one order into timed child executions. Plans are regenerated from
//! the persisted slice count and seed on every fire, so the same inputs always
//! yield the same sizes and offsets.

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use shared::config::TwapSettings;
use shared::error::{EngineError, EngineResult};

/// Slice sizes are truncated to this many decimals
pub const SIZE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct TwapSlice {
    pub index: u32,
    /// USDC notional of this slice
    pub size: Decimal,
    /// Offset from the start of the TWAP run
    pub offset: Duration,
}

/// Lazy, finite sequence of slices. Not `Clone`: the rng state is consumed
/// as slices are produced.
#[derive(Debug)]
pub struct TwapPlan {
    total: Decimal,
    slice_size: Decimal,
    slice_count: u32,
    interval_ms: f64,
    jitter_pct: f64,
    rng: StdRng,
    next_index: u32,
    allocated: Decimal,
}

impl Iterator for TwapPlan {
    type Item = TwapSlice;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.slice_count {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let size = if index + 1 == self.slice_count {
            // last slice absorbs the truncation remainder
            self.total - self.allocated
        } else {
            self.allocated += self.slice_size;
            self.slice_size
        };

        // jitter stays within half an interval, keeping offsets ordered
        let jitter = if index > 0 && self.jitter_pct > 0.0 {
            self.rng.gen_range(-self.jitter_pct..=self.jitter_pct)
        } else {
            0.0
        };
        let offset_ms = ((index as f64 + jitter) * self.interval_ms).round() as i64;

        Some(TwapSlice {
            index,
            size,
            offset: Duration::milliseconds(offset_ms),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.slice_count - self.next_index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TwapPlan {}

#[derive(Debug, Clone)]
pub struct TwapSlicer {
    settings: TwapSettings,
}

impl TwapSlicer {
    pub fn new(settings: TwapSettings) -> Self {
        Self { settings }
    }

    /// One slice per `min_slice_notional`, at most one per minute and never
    /// more than `max_slices`
    pub fn derive_slice_count(&self, total: Decimal, running_time_minutes: u32) -> u32 {
        let by_notional = if self.settings.min_slice_notional > Decimal::ZERO {
            (total / self.settings.min_slice_notional)
                .floor()
                .to_u32()
                .unwrap_or(u32::MAX)
        } else {
            u32::MAX
        };
        let ceiling = running_time_minutes.min(self.settings.max_slices).max(1);
        by_notional.clamp(1, ceiling)
    }

    /// Build the slice plan of a TWAP run
    pub fn plan(
        &self,
        total: Decimal,
        running_time_minutes: u32,
        randomize: bool,
        slice_count: u32,
        seed: u64,
    ) -> EngineResult<TwapPlan> {
        if total <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!("TWAP total must be positive, got {}", total)));
        }
        if running_time_minutes == 0 {
            return Err(EngineError::InvalidInput("TWAP running time must be positive".to_string()));
        }
        if slice_count == 0 {
            return Err(EngineError::InvalidInput("TWAP needs at least one slice".to_string()));
        }
        if !(0.0..0.5).contains(&self.settings.jitter_pct) {
            return Err(EngineError::InvalidInput(format!(
                "TWAP jitter must be in [0, 0.5), got {}",
                self.settings.jitter_pct
            )));
        }

        let slice_size = (total / Decimal::from(slice_count))
            .round_dp_with_strategy(SIZE_DECIMALS, RoundingStrategy::ToZero);
        if slice_size <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "TWAP total {} is too small for {} slices",
                total, slice_count
            )));
        }

        let running_ms = running_time_minutes as f64 * 60_000.0;
        Ok(TwapPlan {
            total,
            slice_size,
            slice_count,
            interval_ms: running_ms / slice_count as f64,
            jitter_pct: if randomize { self.settings.jitter_pct } else { 0.0 },
            rng: StdRng::seed_from_u64(seed),
            next_index: 0,
            allocated: Decimal::ZERO,
        })
    }
}
