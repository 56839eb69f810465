//! Conversions between human-readable decimal amounts and the chain's
//! integer fixed-point representation. String-digit based - no floating
//! point anywhere on the money path.

use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;

use crate::error::EngineError;

/// Converts a decimal amount to base units at the given number of decimal
/// places. Fractional digits beyond `decimals` are truncated.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, EngineError> {
    if amount.is_sign_negative() {
        return Err(EngineError::InvalidAmount(format!(
            "Negative amount: {amount}"
        )));
    }

    let rendered = amount.normalize().to_string();
    let mut parts = rendered.splitn(2, '.');
    let whole_part = parts.next().unwrap_or("0");
    let frac_part = parts.next().unwrap_or("");

    let whole = U256::from_str_radix(if whole_part.is_empty() { "0" } else { whole_part }, 10)
        .map_err(|e| EngineError::InvalidAmount(format!("Invalid whole part: {e}")))?;

    let mut frac: String = frac_part.chars().take(decimals as usize).collect();
    while frac.len() < decimals as usize {
        frac.push('0');
    }
    let frac = if frac.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&frac, 10)
            .map_err(|e| EngineError::InvalidAmount(format!("Invalid fractional part: {e}")))?
    };

    let scale = U256::from(10).pow(U256::from(decimals));
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| EngineError::InvalidAmount(format!("Amount out of range: {amount}")))
}

/// Converts a raw base-unit amount back to a decimal at the given number of
/// decimal places.
pub fn from_base_units(raw: U256, decimals: u8) -> Result<Decimal, EngineError> {
    let scale = U256::from(10).pow(U256::from(decimals));
    let whole = raw / scale;
    let remainder = raw % scale;

    let rendered = if remainder.is_zero() {
        whole.to_string()
    } else {
        let frac = format!("{remainder:0>width$}", width = decimals as usize);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    };

    Decimal::from_str(&rendered)
        .map_err(|e| EngineError::InvalidAmount(format!("Amount {rendered} out of range: {e}")))
}

/// Applies a fractional slippage tolerance to a quoted output amount:
/// `quoted * (1 - slippage)`, floored to an integer base-unit amount.
pub fn apply_slippage(quoted: U256, slippage: Decimal) -> Result<U256, EngineError> {
    if slippage.is_sign_negative() || slippage >= Decimal::ONE {
        return Err(EngineError::InvalidInput(format!(
            "Slippage must be in [0, 1), got {slippage}"
        )));
    }

    let factor = (Decimal::ONE - slippage).normalize();
    let numerator = U256::from(factor.mantissa().unsigned_abs());
    let denominator = U256::from(10).pow(U256::from(factor.scale()));

    quoted
        .checked_mul(numerator)
        .map(|scaled| scaled / denominator)
        .ok_or_else(|| EngineError::InvalidAmount("Slippage computation overflow".into()))
}
