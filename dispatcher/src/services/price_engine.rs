//! Slippage-adjusted limit price computation
//!
//! Venue prices carry at most 5 significant figures and at most
//! `6 - tick_precision` decimals, where `tick_precision` is the size
//! precision of the asset.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use shared::error::{EngineError, EngineResult};

pub const SIGNIFICANT_FIGURES: u32 = 5;
pub const MAX_PRICE_DECIMALS: u32 = 6;

/// Shift `base_price` by `slippage` against the taker and round it to the
/// venue's price grid.
///
/// Buys pay up to `base * (1 + slippage)`, sells accept down to
/// `base * (1 - slippage)`. The ceiling on `slippage` is the caller's policy.
pub fn adjusted_price(
    base_price: f64,
    is_buy: bool,
    slippage: f64,
    tick_precision: u32,
) -> EngineResult<Decimal> {
    if !base_price.is_finite() || base_price <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "base price must be positive, got {}",
            base_price
        )));
    }
    if !slippage.is_finite() || !(0.0..1.0).contains(&slippage) {
        return Err(EngineError::InvalidInput(format!(
            "slippage must be in [0, 1), got {}",
            slippage
        )));
    }
    if tick_precision > MAX_PRICE_DECIMALS {
        return Err(EngineError::InvalidInput(format!(
            "tick precision must be at most {}, got {}",
            MAX_PRICE_DECIMALS, tick_precision
        )));
    }

    let base = Decimal::from_f64(base_price)
        .ok_or_else(|| EngineError::InvalidInput(format!("base price {} is out of range", base_price)))?;
    let slippage = Decimal::from_f64(slippage)
        .ok_or_else(|| EngineError::InvalidInput(format!("slippage {} is out of range", slippage)))?;

    let factor = if is_buy {
        Decimal::ONE + slippage
    } else {
        Decimal::ONE - slippage
    };
    let shifted = base
        .checked_mul(factor)
        .ok_or_else(|| EngineError::InvalidInput("price overflow".to_string()))?;

    let price = shifted
        .round_sf(SIGNIFICANT_FIGURES)
        .ok_or_else(|| EngineError::InvalidInput(format!("cannot round {} to significant figures", shifted)))?
        .round_dp(MAX_PRICE_DECIMALS - tick_precision);

    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "price {} rounds to zero at tick precision {}",
            shifted, tick_precision
        )));
    }

    Ok(price.normalize())
}
