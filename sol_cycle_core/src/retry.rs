// Shared retry/timeout policy for flaky external calls.

use crate::error::CoreError;
use crate::settings::Settings;
use log::warn;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Bound on a single attempt; None lets an attempt run unbounded.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.balance_retry_attempts,
            delay: Duration::from_secs(settings.balance_retry_delay_secs),
            attempt_timeout: Some(Duration::from_secs(settings.command_timeout_secs)),
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted; returns the
    /// last error. A timed-out attempt counts as a failed attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut last_err = CoreError::Validation(format!("{}: no attempts made", label));
        for attempt in 1..=self.max_attempts {
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(r) => r,
                    Err(_) => Err(CoreError::Timeout(format!(
                        "{}: attempt {} exceeded {:?}",
                        label, attempt, limit
                    ))),
                },
                None => op().await,
            };
            match result {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!("{}: attempt {}/{} failed: {}", label, attempt, self.max_attempts, e);
                    last_err = e;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}
