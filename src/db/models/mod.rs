mod burn;
mod chain;
mod checkpoint;
mod distribution;
mod holder;
mod swap;

pub use burn::Burn;
pub use chain::ChainKey;
pub use checkpoint::{Checkpoint, Scope};
pub use distribution::{Distribution, EarnedTotal};
pub use holder::{merge_holders, Holder};
pub use swap::{Swap, SwapAction};
