/// Bounded request pool
///
/// Pending requests sit in a queue drained by a fixed number of workers.
/// A quota failure pushes back a shared resume time (exponential, capped)
/// that every worker waits for before dispatching again, and re-queues the
/// failed request a limited number of times. Other failures are final.
use crate::backends::ProviderError;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub max_quota_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_quota_retries: 2,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(16000),
        }
    }
}

impl PoolConfig {
    /// Delay after `consecutive` quota failures in a row: base, 2x base,
    /// 4x base, ... capped at `backoff_max`.
    pub fn backoff_delay(&self, consecutive: u32) -> Duration {
        if consecutive == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(consecutive - 1);
        self.backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

struct Job<I> {
    index: usize,
    input: I,
    attempt: u32,
}

#[derive(Default)]
struct Backoff {
    consecutive: u32,
    resume_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestPool {
    config: PoolConfig,
}

impl RequestPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Runs `op` once per input and returns the outcomes in input order,
    /// whatever order they completed in.
    pub async fn run<I, T, F, Fut>(&self, inputs: Vec<I>, op: F) -> Vec<Result<T, ProviderError>>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let total = inputs.len();
        if total == 0 {
            return Vec::new();
        }

        let queue: Mutex<VecDeque<Job<I>>> = Mutex::new(
            inputs
                .into_iter()
                .enumerate()
                .map(|(index, input)| Job {
                    index,
                    input,
                    attempt: 0,
                })
                .collect(),
        );
        let results: Mutex<Vec<Option<Result<T, ProviderError>>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let backoff = Mutex::new(Backoff::default());

        let workers = self.config.max_concurrency.max(1).min(total);
        tracing::debug!(requests = total, workers, "dispatching request batch");

        join_all((0..workers).map(|worker| self.worker(worker, &queue, &results, &backoff, &op)))
            .await;

        results
            .into_inner()
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    tracing::error!(index, "request pool finished without an outcome for request");
                    Err(ProviderError::Other(format!("request {index} was never dispatched")))
                })
            })
            .collect()
    }

    async fn worker<I, T, F, Fut>(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<Job<I>>>,
        results: &Mutex<Vec<Option<Result<T, ProviderError>>>>,
        backoff: &Mutex<Backoff>,
        op: &F,
    ) where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        loop {
            let Some(job) = queue.lock().pop_front() else {
                break;
            };

            let resume_at = backoff.lock().resume_at;
            if let Some(at) = resume_at {
                if at > Instant::now() {
                    tracing::debug!(worker, index = job.index, "waiting out quota backoff");
                    sleep_until(at).await;
                }
            }

            let outcome = op(job.input.clone()).await;
            match outcome {
                Err(err) if err.is_quota() && job.attempt < self.config.max_quota_retries => {
                    let delay = {
                        let mut state = backoff.lock();
                        state.consecutive += 1;
                        let delay = self.config.backoff_delay(state.consecutive);
                        let at = Instant::now() + delay;
                        state.resume_at = Some(state.resume_at.map_or(at, |current| current.max(at)));
                        delay
                    };
                    tracing::warn!(
                        worker,
                        index = job.index,
                        attempt = job.attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "quota exhausted, re-queueing request"
                    );
                    queue.lock().push_back(Job {
                        attempt: job.attempt + 1,
                        ..job
                    });
                }
                outcome => {
                    if outcome.is_ok() {
                        backoff.lock().consecutive = 0;
                    }
                    results.lock()[job.index] = Some(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let config = PoolConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(16));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_results_are_index_aligned() {
        let pool = RequestPool::new(PoolConfig {
            max_concurrency: 3,
            ..PoolConfig::default()
        });
        let results = pool
            .run(vec![30u64, 10, 20, 0], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if ms == 20 {
                    Err(ProviderError::Other("boom".into()))
                } else {
                    Ok(ms * 2)
                }
            })
            .await;
        assert_eq!(results[0], Ok(60));
        assert_eq!(results[1], Ok(20));
        assert!(results[2].is_err());
        assert_eq!(results[3], Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_retries_are_bounded() {
        let attempts = AtomicUsize::new(0);
        let pool = RequestPool::new(PoolConfig {
            max_concurrency: 1,
            max_quota_retries: 2,
            ..PoolConfig::default()
        });
        let started = Instant::now();
        let results = pool
            .run(vec![()], |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::QuotaExhausted("429".into())) }
            })
            .await;
        assert!(results[0].as_ref().unwrap_err().is_quota());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_non_quota_failures_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let pool = RequestPool::default();
        let results = pool
            .run(vec![()], |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::transport("reset")) }
            })
            .await;
        assert!(results[0].is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
