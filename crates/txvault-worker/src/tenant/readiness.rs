//! Fixed-delay readiness retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Bounded retry used while a tenant database comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Probes before giving up. Values below one are treated as one.
    pub max_attempts: u32,
    /// Pause between consecutive probes.
    pub delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Outcome of waiting for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    /// A probe succeeded.
    Ready(T),
    /// Every probe failed.
    Unready,
}

impl<T> Readiness<T> {
    /// Check if the resource became ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Run `probe` until it succeeds or `policy.max_attempts` probes have failed.
///
/// Sleeps `policy.delay` between attempts only, never after the last one.
pub async fn retry_fixed<T, E, F, Fut>(policy: ReadinessPolicy, mut probe: F) -> Readiness<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "probe succeeded after retry");
                }
                return Readiness::Ready(value);
            }
            Err(e) if attempt < max_attempts => {
                debug!(attempt, max_attempts, error = %e, "probe failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                warn!(attempts = max_attempts, error = %e, "all probes failed");
            }
        }
    }

    Readiness::Unready
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exactly_max_attempts() {
        let counter = AtomicU32::new(0);
        let probes = &counter;
        let started = Instant::now();

        let outcome: Readiness<()> = retry_fixed(ReadinessPolicy::default(), move || async move {
            probes.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("connection refused")
        })
        .await;

        assert_eq!(outcome, Readiness::Unready);
        assert_eq!(probes.load(Ordering::SeqCst), 5);
        // Four pauses between five probes.
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let counter = AtomicU32::new(0);
        let probes = &counter;
        let started = Instant::now();

        let outcome = retry_fixed(ReadinessPolicy::default(), move || async move {
            let n = probes.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("starting up")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(outcome, Readiness::Ready(3));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_probes_once() {
        let counter = AtomicU32::new(0);
        let probes = &counter;
        let policy = ReadinessPolicy {
            max_attempts: 0,
            delay: Duration::from_secs(1),
        };

        let outcome: Readiness<()> = retry_fixed(policy, move || async move {
            probes.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        })
        .await;

        assert!(!outcome.is_ready());
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }
}
