//! Fixed-delay retry for transport establishment.
//!
//! Used by the client for both the stream connect and the datagram
//! bind/connect. After the last attempt fails the error is returned and no
//! further retries happen.

use std::future::Future;
use std::io;

use anyhow::{Context, Result};

use crate::config::RetryPolicy;

/// Run `attempt` until it succeeds or `policy` is exhausted.
///
/// `what` names the operation in logs and in the final error context.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempts = policy.attempts();
    let mut tried = 0;
    loop {
        tried += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if tried >= attempts => {
                return Err(e).with_context(|| format!("{what} failed after {tried} attempts"));
            }
            Err(e) => {
                log::warn!(
                    "[Client] {what} failed ({e}), attempt {tried}/{attempts}, retrying in {:?}",
                    policy.delay()
                );
                tokio::time::sleep(policy.delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    fn policy(delay_ms: u64, max_retries: u32) -> RetryPolicy {
        RetryPolicy { delay_ms, max_retries }
    }

    #[tokio::test]
    async fn test_first_success_needs_no_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let value = with_retry(&policy(1000, 3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, io::Error>(7) }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let value = with_retry(&policy(5, 3), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = with_retry(&policy(20, 3), "stream connect", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(err.to_string().contains("stream connect failed after 4 attempts"));
    }
}
