//! Type conversion and formatting utilities.
//!
//! Token amounts arrive as raw U256 / signed integers and are stored as
//! decimal-adjusted f64. The conversion goes through BigDecimal so large
//! raw values keep their leading digits.

use alloy::primitives::{hex, Address, I256, U256};
use anyhow::Context;
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Lowercase 0x-prefixed form used as the key everywhere in the store.
pub fn format_address(address: &Address) -> String {
    hex_encode(address.as_slice())
}

pub fn parse_address(value: &str) -> anyhow::Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .with_context(|| format!("Invalid address: {}", value))
}

/// Convert U256 to f64 with decimal adjustment, 0.0 if not representable.
///
/// # Example
/// ```ignore
/// let value = U256::from(1_000_000_000_000_000_000u128); // 1e18
/// let adjusted = u256_to_f64(value, 18); // Returns 1.0
/// ```
pub fn u256_to_f64(value: U256, decimals: u8) -> f64 {
    u256_to_f64_safe(value, decimals).unwrap_or(0.0)
}

/// Convert U256 to f64 with decimal adjustment.
///
/// Returns None if the value cannot be converted to a finite f64.
pub fn u256_to_f64_safe(value: U256, decimals: u8) -> Option<f64> {
    let bytes: [u8; 32] = value.to_le_bytes();
    let big_int = BigInt::from_bytes_le(num_bigint::Sign::Plus, &bytes);
    let adjusted = BigDecimal::from(big_int) / big_pow10(decimals);

    let result = adjusted.to_f64()?;
    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

/// Split a signed pool delta into (negative, magnitude).
pub fn signed_parts(value: I256) -> (bool, U256) {
    (value.is_negative(), value.unsigned_abs())
}

/// Same as [`signed_parts`] for the int128 deltas of V4 pools.
pub fn signed_parts_i128(value: i128) -> (bool, U256) {
    (value < 0, U256::from(value.unsigned_abs()))
}

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_scaling() {
        let value = U256::from(500u64) * U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(u256_to_f64(value, 18), 500.0);
        assert_eq!(u256_to_f64(U256::from(3_000_000u64), 6), 3.0);
        assert_eq!(u256_to_f64(U256::from(5u64), 1), 0.5);
    }

    #[test]
    fn test_signed_parts() {
        let neg: I256 = "-120000000000000000000".parse().unwrap();
        assert_eq!(
            signed_parts(neg),
            (true, U256::from(120u64) * U256::from(10u64).pow(U256::from(18u64)))
        );
        assert_eq!(signed_parts_i128(-7), (true, U256::from(7u64)));
        assert_eq!(signed_parts_i128(9), (false, U256::from(9u64)));
    }

    #[test]
    fn test_address_formatting_is_lowercase() {
        let address = parse_address("0x000000000000000000000000000000000000dEaD").unwrap();
        assert_eq!(
            format_address(&address),
            "0x000000000000000000000000000000000000dead"
        );
        assert!(parse_address("not-an-address").is_err());
    }
}
