use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, shared by the CZDS client (§4.2: base 2s,
/// cap 5m) and the job runner (§4.6: base 30s, cap 1h). One implementation,
/// two policies — both call sites need the same shape (retry N times,
/// doubling the delay up to a cap, full jitter).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
        }
    }

    /// Delay before retry attempt `attempt` (1-indexed), full-jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(32));
        let capped = exp.min(self.cap.as_millis());
        let capped_ms = capped.max(1) as u64;
        let jittered = rand::rng().random_range(0..=capped_ms);
        Duration::from_millis(jittered)
    }
}

/// Outcome classification an operation returns so the retry loop knows
/// whether to try again (spec §7: transient vs. fatal).
pub enum Attempt<T> {
    Ok(T),
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Run `op` up to `policy.max_retries` additional times, sleeping with
/// jittered backoff between attempts, as long as it reports `Attempt::Retry`.
/// Returns the last error if retries are exhausted or the op reports fatal.
pub async fn retry_with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last_delay = Duration::ZERO;
    for attempt in 0..=policy.max_retries {
        match op(attempt).await {
            Attempt::Ok(v) => return Ok(v),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retry(e) => {
                if attempt == policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                // Monotonically non-decreasing delays (testable property 7):
                // the jittered exponential curve already trends upward, but
                // never let a late jitter roll shrink below the last floor.
                let delay = delay.max(last_delay);
                last_delay = delay;
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error: {e}");
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("loop always returns before exhausting range")
}
