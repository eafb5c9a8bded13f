use std::time::Duration;

use tracing::warn;

/// How often and how patiently a request is repeated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed after the initial one.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// `retry_delay * (1 + U[0, 1))`
    pub fn backoff(&self) -> Duration {
        self.retry_delay.mul_f64(1.0 + rand::random::<f64>())
    }
}

/// Every attempt failed; `last` is the error of the final one.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `attempt` until it succeeds or the policy runs out of retries.
///
/// The closure receives the 1-based attempt number. A jittered sleep
/// separates consecutive attempts; there is no sleep after the last one.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut number = 0;
    loop {
        number += 1;
        match attempt(number).await {
            Ok(value) => return Ok(value),
            Err(last) if number > policy.max_retries => {
                return Err(Exhausted {
                    attempts: number,
                    last,
                });
            }
            Err(error) => {
                let delay = policy.backoff();
                warn!(
                    %error,
                    attempt = number,
                    of = policy.attempts(),
                    delay_secs = delay.as_secs_f64(),
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
