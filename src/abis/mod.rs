pub mod erc20;
pub mod v2;
pub mod v3;
pub mod v4;

pub use erc20::{Transfer, IERC20};
pub use v2::Swap as V2Swap;
pub use v3::Swap as V3Swap;
pub use v4::Swap as V4Swap;
