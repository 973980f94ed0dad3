use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Delay schedule between connection attempts.
///
/// Retries are never bounded in count: the connector keeps trying until it
/// succeeds or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Sleep the same interval after every failure
    Fixed(Duration),
    /// Double the delay after every failure, starting at `initial`, never above `max`
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(5))
    }
}

/// Shortest sleep allowed between two connection attempts
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);

impl ReconnectPolicy {
    /// Build a policy from an initial and a maximum backoff.
    /// A maximum that does not exceed the initial value yields a fixed interval.
    /// The initial value is raised to [`MIN_RECONNECT_DELAY`] if it is shorter.
    pub fn from_bounds(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_RECONNECT_DELAY);
        if max > initial {
            Self::Exponential { initial, max }
        } else {
            Self::Fixed(initial)
        }
    }

    /// Delay to wait after the given number of consecutive failures (1-based)
    pub fn delay_after(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential { initial, max } => {
                let exponent = failures.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

/// Run `attempt` until it succeeds, sleeping per `policy` between failures.
///
/// Returns `None` only if `ctx` is cancelled before an attempt succeeds.
/// The returned value is always the result of one complete, successful
/// attempt; nothing partially initialized is handed out.
pub async fn connect_with_retry<T, F, Fut>(
    endpoint: &str,
    policy: &ReconnectPolicy,
    ctx: &CancellationToken,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            return None;
        }

        info!(endpoint = %endpoint, attempt = failures + 1, "connecting");

        let outcome = tokio::select! {
            _ = ctx.cancelled() => return None,
            outcome = attempt() => outcome,
        };

        match outcome {
            Ok(connected) => {
                info!(endpoint = %endpoint, attempts = failures + 1, "connected");
                return Some(connected);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = policy.delay_after(failures);
                warn!(
                    endpoint = %endpoint,
                    error = %format!("{:#}", e),
                    failures,
                    retry_in = ?delay,
                    "connection attempt failed, retrying"
                );

                tokio::select! {
                    _ = ctx.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
