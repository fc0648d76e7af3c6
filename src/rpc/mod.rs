//! Chain access: classified provider errors, a shared retry policy and
//! ordered per-chain provider pools.

pub mod error;
pub mod pool;
pub mod provider;
pub mod retry;

pub use error::{ErrorKind, RpcError};
pub use pool::ProviderPool;
pub use provider::{ChainRpc, LogQuery, RpcProvider};
pub use retry::RetryPolicy;
