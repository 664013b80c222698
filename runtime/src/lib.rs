pub mod cache;
pub mod cancel;
pub mod limiter;
pub mod retry;

pub use cache::{AgentCache, CacheEntry, CacheError, DerivedCache};
pub use cancel::CancellationToken;
pub use limiter::LaneLimiter;
pub use retry::{with_retry, RetryPolicy};
