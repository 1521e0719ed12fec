//! Backoff for connection establishment.

use std::{future::Future, time::Duration};

use relq_core::{Result, relq_trace_retry};
use serde::Deserialize;

/// Exponential backoff: attempt `n` waits `min_delay * factor^(n-1)`, capped
/// at `max_delay`. Only connection errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectRetry {
    pub attempts: u32,
    pub factor: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            factor: 1.5,
            min_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

impl ConnectRetry {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = (self.min_delay_ms as f64 * self.factor.powi(exponent)).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Runs `connect` until it succeeds, fails with anything but a connection
    /// error, or the attempts run out. The last error is returned.
    pub async fn run<F, Fut, T>(&self, mut connect: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match connect().await {
                Err(err) if err.is_connection_error() && attempt < self.attempts.max(1) => {
                    let delay = self.delay(attempt);
                    relq_trace_retry!(attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_core::{Error, QueryError};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_cap() {
        let retry = ConnectRetry::default();
        assert_eq!(retry.delay(1), Duration::from_millis(50));
        assert_eq!(retry.delay(2), Duration::from_millis(75));
        assert_eq!(retry.delay(3), Duration::from_millis(112));
        assert_eq!(retry.delay(20), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_connection_errors_only() {
        let calls = AtomicU32::new(0);
        let retry = ConnectRetry {
            attempts: 3,
            ..Default::default()
        };

        let result: Result<()> = retry
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueryError::connection("refused").into())
            })
            .await;
        assert!(result.unwrap_err().is_connection_error());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let result: Result<()> = retry
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotFound)
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = ConnectRetry::default()
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueryError::connection("refused").into())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
