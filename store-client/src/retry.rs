//! Exponential backoff for transient transport failures.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::config::RetryConfig;
use crate::error::{Result, StoreError};

/// Runs `operation`, retrying only [`StoreError::Transient`] failures.
///
/// Every other error is returned on first sight. When retries run out the
/// last transient error is surfaced unchanged.
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.initial_backoff_ms))
        .with_max_delay(Duration::from_millis(config.max_backoff_ms))
        .with_factor(config.backoff_multiplier)
        .with_max_times(config.max_retries);
    if config.jitter {
        backoff = backoff.with_jitter();
    }

    operation
        .retry(backoff)
        .when(StoreError::is_transient)
        .notify(|err: &StoreError, delay: Duration| {
            tracing::warn!("{label}: {err}, retrying in {delay:?}");
        })
        .await
}
