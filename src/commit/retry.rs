use crate::config::RetryConfig;
use crate::error::AccessError;
use crate::store::CancellationReason;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// True when a rejected commit failed only on transient contention: no item
/// carries a deterministic reason and every failing item is a conflict.
pub fn is_transient(reasons: &[CancellationReason]) -> bool {
    let mut failing = reasons.iter().filter(|r| r.is_failure()).peekable();
    failing.peek().is_some()
        && failing.all(|r| matches!(r, CancellationReason::TransactionConflict))
}

/// Re-runs an operation while it fails with [`AccessError::TransactionConflict`],
/// sleeping a growing, randomized interval between attempts until the
/// accumulated wait exceeds the configured budget.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let cfg = &self.config;
        let incremental = cfg
            .initial_delay_ms
            .saturating_add(cfg.step_ms.saturating_mul(u64::from(attempt)));
        let millis = if incremental <= cfg.max_incremental_ms {
            let spread = cfg.step_ms / 3;
            rng.gen_range(incremental..=incremental.saturating_add(spread))
        } else {
            rng.gen_range(cfg.jitter_min_ms..=cfg.jitter_max_ms)
        };
        Duration::from_millis(millis)
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, AccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AccessError>>,
    {
        let budget = self.config.max_total_wait();
        let mut waited = Duration::ZERO;
        let mut attempt: u32 = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err @ AccessError::TransactionConflict { .. }) => err,
                Err(err) => return Err(err),
            };
            if waited >= budget {
                warn!(
                    attempts = attempt + 1,
                    waited_ms = waited.as_millis() as u64,
                    conflicts = err.failures().len(),
                    "retry budget exhausted"
                );
                return Err(err);
            }
            let delay = self.delay_for(attempt, &mut rand::thread_rng());
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                conflicts = err.failures().len(),
                "transaction conflict, retrying"
            );
            tokio::time::sleep(delay).await;
            waited += delay;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryExecutor, is_transient};
    use crate::config::RetryConfig;
    use crate::error::AccessError;
    use crate::store::CancellationReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn only_pure_conflicts_are_transient() {
        use CancellationReason::*;
        assert!(is_transient(&[None, TransactionConflict]));
        assert!(!is_transient(&[TransactionConflict, ThrottlingError]));
        assert!(!is_transient(&[
            TransactionConflict,
            ConditionalCheckFailed { current: Option::None }
        ]));
        assert!(!is_transient(&[TransactionConflict, Other("boom".into())]));
        assert!(!is_transient(&[None]));
    }

    #[test]
    fn delays_grow_then_jitter_within_bounds() {
        let exec = RetryExecutor::new(RetryConfig::default());
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let first = exec.delay_for(0, &mut rng).as_millis();
            let third = exec.delay_for(2, &mut rng).as_millis();
            let late = exec.delay_for(7, &mut rng).as_millis();
            assert!((150..=200).contains(&first), "{first}");
            assert!((450..=500).contains(&third), "{third}");
            assert!((450..=800).contains(&late), "{late}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_conflicts_exhaust_the_budget() {
        let exec = RetryExecutor::new(RetryConfig::default());
        let calls = &AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = exec
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AccessError::TransactionConflict {
                    failures: Vec::new(),
                })
            })
            .await;
        assert_eq!(result.expect_err("exhausted").code_str(), "transaction_conflict");
        assert!(calls.load(Ordering::SeqCst) >= 9);
        assert!(started.elapsed().as_millis() >= 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let exec = RetryExecutor::new(RetryConfig::default());
        let calls = &AtomicUsize::new(0);
        let result: Result<(), _> = exec
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AccessError::Validation("bad".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_conflicts_returns_value() {
        let exec = RetryExecutor::new(RetryConfig::default());
        let calls = &AtomicUsize::new(0);
        let value = exec
            .run(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AccessError::TransactionConflict {
                        failures: Vec::new(),
                    })
                } else {
                    Ok(7)
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn disabled_schedule_surfaces_first_conflict() {
        let exec = RetryExecutor::new(RetryConfig::disabled());
        let calls = &AtomicUsize::new(0);
        let result: Result<(), _> = exec
            .run(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AccessError::TransactionConflict {
                    failures: Vec::new(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
