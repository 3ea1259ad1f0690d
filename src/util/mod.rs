//! Shared helpers (error aggregation, retry policies, boxed futures).

pub mod error;
pub mod retry;

use std::future::Future;
use std::pin::Pin;

pub use error::ClientError;
pub use retry::{RetryHandle, RetryPolicy, RetryStrategy, RetryableCodes};

/// Boxed future used at dyn-compatible async seams.
pub type PinFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
