//! Shared constants and conversion helpers.

mod conversion;

use alloy::primitives::{address, Address};

/// The Ethereum zero address. Source of mints, never a holder.
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// Tokens sent here are burned.
pub const BURN_ADDRESS: Address = address!("000000000000000000000000000000000000dead");

/// MOON uses 18 decimals on every chain.
pub const MOON_DECIMALS: u8 = 18;

/// Zero and burn addresses are excluded from holder tracking.
pub fn is_untracked(address: &Address) -> bool {
    *address == ZERO_ADDRESS || *address == BURN_ADDRESS
}

pub use conversion::{
    format_address, hex_encode, parse_address, signed_parts, signed_parts_i128, u256_to_f64,
    u256_to_f64_safe,
};
