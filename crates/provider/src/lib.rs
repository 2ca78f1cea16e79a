//! External generation provider: the synchronous generation call, the
//! asynchronous batch API, and the HTTP client that talks to Anthropic.

pub mod anthropic;
mod error;
pub mod retry;
mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use anthropic::AnthropicClient;
pub use error::{ProviderError, ProviderResult};
pub use retry::{with_retry, with_retry_when, RetryPolicy};
pub use traits::{BatchProvider, GenerationProvider, Provider};
pub use types::*;
