//! Retry logic with exponential backoff
//!
//! Transient failures (connection resets, timeouts, interrupted transfers,
//! server-side 5xx/429 answers) are retried with a doubling, capped delay.
//! Everything else, and the final failure once attempts run out, is returned
//! unchanged.
//!
//! # Example
//!
//! ```no_run
//! use melodl::retry::{IsRetryable, download_with_retry};
//! use melodl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::stream();
//! download_with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection reset, server busy) return `true`.
/// Permanent failures (not found, region restriction, bad descriptor) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Server overload is transient, other statuses are rejections
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Error::Config(_)
            | Error::RegionRestricted { .. }
            | Error::Download(_)
            | Error::Tagging(_)
            | Error::Conversion { .. }
            | Error::Backend(_)
            | Error::Serialization(_)
            | Error::NotSupported(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` bounds the total number of calls to `operation`.
/// The delay starts at `initial_delay`, is multiplied by `backoff_multiplier`
/// after each failure and never exceeds `max_delay`.
pub async fn download_with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    download_with_retry_until(config, &CancellationToken::new(), operation).await
}

/// [`download_with_retry`] that gives up waiting once `cancel` fires
///
/// A cancellation during a backoff delay returns the last error without
/// another attempt. An attempt already running is not interrupted.
pub async fn download_with_retry_until<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempt = attempt, "Retry abandoned after cancellation");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                attempt += 1;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add up to 100% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DownloadError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    async fn run(config: &RetryConfig, fail_times: u32, err: fn() -> TestError) -> (Result<u32, TestError>, u32) {
        let counter = Arc::new(AtomicU32::new(0));
        let result = download_with_retry(config, || {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < fail_times { Err(err()) } else { Ok(count) }
            }
        })
        .await;
        (result, counter.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn success_needs_a_single_call() {
        let (result, calls) = run(&fast(3), 0, || TestError::Transient).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let (result, calls) = run(&fast(3), 2, || TestError::Transient).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn max_attempts_counts_the_first_call() {
        let (result, calls) = run(&fast(3), u32::MAX, || TestError::Transient).await;
        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls, 3, "three attempts in total");
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let (result, calls) = run(&fast(10), u32::MAX, || TestError::Permanent).await;
        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn backoff_doubles_and_is_capped() {
        let start = std::time::Instant::now();
        let _ = run(&fast(4), u32::MAX, || TestError::Transient).await;
        // 10ms + 20ms + 25ms (capped)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(55), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_backoff_short() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            ..fast(5)
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let counter = Arc::new(AtomicU32::new(0));
        let start = std::time::Instant::now();
        let result: Result<(), TestError> = download_with_retry_until(&config, &cancel, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5), "waited {:?}", start.elapsed());
    }

    #[test]
    fn jitter_stays_within_double_delay() {
        let delay = Duration::from_millis(100);
        for _ in 0..20 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn error_classification() {
        let reset = Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert!(reset.is_retryable());

        let missing = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!missing.is_retryable());

        let busy = Error::HttpStatus { url: "http://x".into(), status: 503 };
        assert!(busy.is_retryable());
        let throttled = Error::HttpStatus { url: "http://x".into(), status: 429 };
        assert!(throttled.is_retryable());
        let forbidden = Error::HttpStatus { url: "http://x".into(), status: 403 };
        assert!(!forbidden.is_retryable());

        let region = Error::RegionRestricted {
            backend: "b".into(),
            account_index: 0,
            message: "nope".into(),
        };
        assert!(!region.is_retryable());

        let invalid: Error = DownloadError::InvalidTrack {
            track_id: "1".into(),
            reason: "none".into(),
        }
        .into();
        assert!(!invalid.is_retryable());
    }
}
