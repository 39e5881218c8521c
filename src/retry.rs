//! Backoff for upstream requests.
//!
//! A request is retried while it fails with a status in `retry_on` (or a
//! transport error) and attempts remain. The wait starts at `base_delay`,
//! doubles after every attempt and never exceeds `max_delay`. A `Retry-After`
//! hint from the upstream lengthens the wait but is still capped.

use crate::api::SpotifyError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_on: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            retry_on: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// No retries and no waiting; used by tests and one-shot calls.
    pub fn none() -> Self {
        Self { retries: 0, base_delay: Duration::ZERO, max_delay: Duration::ZERO, ..Default::default() }
    }

    fn should_retry(&self, err: &SpotifyError) -> bool {
        match err {
            SpotifyError::Transport(_) => true,
            other => other.status().map(|s| self.retry_on.contains(&s)).unwrap_or(false),
        }
    }

    /// Wait before the next attempt given the current backoff `delay`.
    pub fn wait_for(&self, err: &SpotifyError, delay: Duration) -> Duration {
        let hinted = match err {
            SpotifyError::RateLimited { retry_after: Some(secs) } => Duration::from_secs(*secs),
            _ => Duration::ZERO,
        };
        delay.max(hinted).min(self.max_delay)
    }

    pub fn next_delay(&self, delay: Duration) -> Duration {
        (delay * 2).min(self.max_delay)
    }
}

fn with_jitter(wait: Duration) -> Duration {
    let max_jitter = wait.as_millis() as u64 / 10;
    if max_jitter == 0 {
        return wait;
    }
    wait + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, SpotifyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SpotifyError>>,
{
    let mut delay = config.base_delay;
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.retries && config.should_retry(&e) => {
                let wait = with_jitter(config.wait_for(&e, delay));
                attempt += 1;
                warn!("upstream request failed ({}); retry {}/{} in {:?}", e, attempt, config.retries, wait);
                tokio::time::sleep(wait).await;
                delay = config.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
