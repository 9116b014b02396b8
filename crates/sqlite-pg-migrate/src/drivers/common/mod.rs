//! Utilities shared by the drivers.
//!
//! - [`tls`]: TLS configuration for the target connection
//! - [`retry_transient`]: bounded retry for connect/acquire

pub mod tls;

pub use tls::{SslMode, TlsBuilder};

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Retry policy for transient connection failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }
}

/// Run `op`, retrying while it fails with a transient error.
///
/// Only connection establishment and pool acquisition go through this;
/// statements that may already have taken effect are never retried.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                warn!(
                    "{} failed ({}), retry {}/{}",
                    what, e, retries, policy.max_retries
                );
                tokio::time::sleep(policy.base_delay * retries).await;
            }
            Err(e) => return Err(e),
        }
    }
}
