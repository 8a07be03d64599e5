//! Network utilities shared by the replica backends.

mod retry;

pub use retry::{retry_async, RetryConfig, RetryStats};
