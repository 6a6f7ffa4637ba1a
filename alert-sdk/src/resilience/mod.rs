//! Resilience patterns for service clients
//!
//! Every external call goes through a bounded `RetryExecutor`. Only errors
//! classified as retryable (network, timeout, rate limit, 5xx) get another
//! attempt; authentication and parsing failures return immediately.

mod retry;

pub use retry::{RetryConfig, RetryExecutor};
