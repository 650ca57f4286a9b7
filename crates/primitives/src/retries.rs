//! Transport-level retry policy for JSON-RPC providers, and a generic backoff helper.
use std::time::Duration;

use alloy::transports::{
    RpcError, TransportError, TransportErrorKind,
    layers::{RetryBackoffLayer, RetryPolicy},
};
use alloy_json_rpc::ErrorPayload;
use serde::Deserialize;
use tokio_retry::{RetryIf, strategy::ExponentialBackoff};

/// Maximum number of retries of a single JSON-RPC request.
const DEFAULT_MAX_RETRIES: u32 = 9;

/// Initial backoff in milliseconds; doubles on every attempt.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 10;

/// Compute units per second assumed for the provider when spacing retries.
const DEFAULT_COMPUTE_UNITS_PER_SECOND: u64 = 100;

/// Base of the exponential backoff used by [`retry_with_backoff_if`], in milliseconds.
const BACKOFF_BASE_MS: u64 = 2;

/// Upper bound of a single [`retry_with_backoff_if`] pause.
const BACKOFF_MAX_DELAY: Duration = Duration::from_millis(500);

/// The default [`RetryBackoffLayer`] installed on every RPC client.
pub const DEFAULT_RETRY_LAYER: RetryBackoffLayer<RateLimitConnRefusedRetryPolicy> =
    RetryBackoffLayer::new_with_policy(
        DEFAULT_MAX_RETRIES,
        DEFAULT_INITIAL_BACKOFF_MS,
        DEFAULT_COMPUTE_UNITS_PER_SECOND,
        RateLimitConnRefusedRetryPolicy,
    );

/// Classification of [`RpcError`]s for retries.
///
/// Mirrors the crate-private logic of alloy's transport crate.
trait RpcErrorExt {
    /// Whether the request may succeed if sent again.
    fn is_retryable(&self) -> bool;

    /// Backoff requested by the provider, if the error carries one.
    fn backoff_hint(&self) -> Option<Duration>;
}

impl RpcErrorExt for RpcError<TransportErrorKind> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retry_err(),
            Self::DeserError { text, .. } => {
                if let Ok(resp) = serde_json::from_str::<ErrorPayload>(text) {
                    return resp.is_retry_err();
                }

                // Some providers answer with a bare `{"error": ...}` object and no id.
                #[derive(Deserialize)]
                struct Resp {
                    error: ErrorPayload,
                }

                serde_json::from_str::<Resp>(text).is_ok_and(|resp| resp.error.is_retry_err())
            }
            Self::ErrorResp(err) => err.is_retry_err(),
            Self::NullResp => true,
            _ => false,
        }
    }

    fn backoff_hint(&self) -> Option<Duration> {
        let Self::ErrorResp(resp) = self else { return None };
        let Some(Ok(data)) = resp.try_data_as::<serde_json::Value>() else { return None };

        // Infura-style rate limit responses carry the requested backoff.
        let backoff_seconds = &data["rate"]["backoff_seconds"];
        if let Some(seconds) = backoff_seconds.as_u64() {
            return Some(Duration::from_secs(seconds));
        }
        backoff_seconds.as_f64().map(|seconds| Duration::from_secs(seconds as u64 + 1))
    }
}

/// A retry policy that also retries when the endpoint refuses the connection.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConnRefusedRetryPolicy;

impl RetryPolicy for RateLimitConnRefusedRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        error.is_retryable() || is_connection_refused(error)
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        error.backoff_hint()
    }
}

/// Checks whether the error message contains "connection refused".
#[inline]
pub fn is_connection_refused<S: ToString>(e: S) -> bool {
    e.to_string().to_lowercase().contains("connection refused")
}

/// Retry the provided async operation with [`ExponentialBackoff`] while `condition` holds
/// for the error it produced.
///
/// Uses the same attempt budget as [`DEFAULT_RETRY_LAYER`].
pub async fn retry_with_backoff_if<F, Fut, T, E, C>(op: F, condition: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    let strategy = ExponentialBackoff::from_millis(BACKOFF_BASE_MS)
        .max_delay(BACKOFF_MAX_DELAY)
        .take(DEFAULT_MAX_RETRIES as usize);
    RetryIf::start(strategy, op, condition).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn detects_connection_refused_case_insensitively() {
        assert!(is_connection_refused("error sending request: Connection Refused (os error 111)"));
        assert!(!is_connection_refused("execution reverted"));
    }

    #[test]
    fn null_responses_are_retried() {
        let err: TransportError = RpcError::NullResp;
        assert!(RateLimitConnRefusedRetryPolicy.should_retry(&err));
    }

    #[tokio::test]
    async fn retries_only_while_condition_holds() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = retry_with_backoff_if(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Err("fatal") } }
            },
            |e: &&str| *e == "transient",
        )
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), ()> = retry_with_backoff_if(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(()) }
            },
            |_: &()| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), DEFAULT_MAX_RETRIES + 1);
    }
}
