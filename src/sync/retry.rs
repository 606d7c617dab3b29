/// Bounded retry for transient provider throttling
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Wraps a single provider call with retry-on-rate-limit semantics.
///
/// Rate limiting is worth waiting out; anything else (malformed request,
/// unknown instrument, transport failure) fails fast so quota is not spent
/// re-sending requests that cannot succeed.
#[derive(Debug, Clone, Copy)]
pub struct RetryingCaller {
    max_attempts: u32,
    cooldown: Duration,
    call_timeout: Duration,
}

impl RetryingCaller {
    pub fn new(max_attempts: u32, cooldown: Duration, call_timeout: Duration) -> Self {
        RetryingCaller {
            max_attempts: max_attempts.max(1),
            cooldown,
            call_timeout,
        }
    }

    /// Execute `op`, retrying rate-limited attempts with linear backoff:
    /// attempt 1 waits one cooldown unit, attempt 2 waits two, and so on.
    /// Every attempt is bounded by the call timeout; an elapsed attempt is
    /// surfaced as a timeout and is not retried.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            let result = match timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && attempt < self.max_attempts => {
                    let wait = self.cooldown * attempt;
                    warn!(
                        "Rate limited (attempt {}/{}), backing off {:?}",
                        attempt, self.max_attempts, wait
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Provider call failed without retry: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
