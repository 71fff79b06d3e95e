//! Retrying dispatch across the key pool
//!
//! Two modes:
//! - rotating: each attempt asks the pool for a key, so a rate-limited key is
//!   swapped out on retry. Bounded by a global concurrency limiter and an
//!   exponential backoff between attempts.
//! - sticky: every attempt uses one caller-supplied key, because the call
//!   depends on server-side state owned by that key. Waits exactly what the
//!   classifier suggests and has a larger attempt budget.
//!
//! Sticky calls do not take a limiter slot and are not bounded in number.
//! Flagged for product review: whether sticky calls should share the limiter.

use std::future::Future;
use std::sync::Arc;

use common::Credential;
use provider::ErrorClassification;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::classify::classify;
use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::pool::KeyPool;
use crate::task::TaskType;

const MODE_ROTATING: &str = "rotating";
const MODE_STICKY: &str = "sticky";

/// Successful rotating dispatch, with the key that served it.
///
/// The key is what a caller pins follow-up sticky calls to.
#[derive(Debug, Clone)]
pub struct Dispatched<T> {
    pub value: T,
    pub credential: Credential,
    pub attempts: u32,
}

/// Runs units of work against the key pool with retry and rotation.
pub struct Dispatcher {
    pool: Arc<KeyPool>,
    limiter: Arc<Semaphore>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher over `pool`.
    ///
    /// `config` is assumed validated; a zero concurrency would block every
    /// rotating call forever.
    pub fn new(pool: Arc<KeyPool>, config: DispatchConfig) -> Self {
        info!(
            concurrency = config.concurrency,
            max_attempts = config.max_attempts,
            sticky_max_attempts = config.sticky_max_attempts,
            "dispatcher initialized"
        );
        Self {
            pool,
            limiter: Arc::new(Semaphore::new(config.concurrency)),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Free rotating slots right now.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Rotating dispatch returning only the value.
    pub async fn dispatch<T, F, Fut>(&self, task: TaskType, work: F) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = provider::Result<T>>,
    {
        self.dispatch_reporting(task, work)
            .await
            .map(|dispatched| dispatched.value)
    }

    /// Rotating dispatch.
    ///
    /// Holds one limiter slot for the whole call, including backoff sleeps.
    /// Each attempt runs `work` with a key chosen for `task`. A rate-limited
    /// attempt cools that key down for the configured cooldown and sleeps
    /// `initial_backoff * 2^(attempt-1)` before the next try. A fatal error
    /// returns at once. Running out of attempts, or of usable keys, returns
    /// `Exhausted`.
    #[instrument(skip_all, fields(call_id = %uuid::Uuid::new_v4().as_simple(), task = %task))]
    pub async fn dispatch_reporting<T, F, Fut>(
        &self,
        task: TaskType,
        mut work: F,
    ) -> Result<Dispatched<T>>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = provider::Result<T>>,
    {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::Configuration("dispatch limiter closed".into()))?;

        let max_attempts = self.config.max_attempts;
        let mut backoff = self.config.initial_backoff();

        for attempt in 1..=max_attempts {
            let key = match self.pool.get_valid_key(task).await {
                Ok(key) => key,
                Err(e) => {
                    if matches!(e, Error::Exhausted(_)) {
                        metrics::counter!("dispatch_exhausted_total", "mode" => MODE_ROTATING)
                            .increment(1);
                        warn!(attempt, "no usable key left in pool");
                    }
                    return Err(e);
                }
            };

            metrics::counter!("dispatch_attempts_total", "mode" => MODE_ROTATING).increment(1);
            debug!(attempt, key = key.id(), "dispatch attempt");

            let err = match work(key.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            attempts = attempt,
                            key = key.id(),
                            "dispatch succeeded after retry"
                        );
                    }
                    return Ok(Dispatched {
                        value,
                        credential: key,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            match classify(&err) {
                ErrorClassification::Fatal => {
                    metrics::counter!("dispatch_fatal_total", "mode" => MODE_ROTATING).increment(1);
                    warn!(
                        key = key.id(),
                        status = ?err.status,
                        error = %err,
                        "fatal upstream error"
                    );
                    return Err(Error::Upstream(err));
                }
                ErrorClassification::RateLimited { .. } => {
                    metrics::counter!("dispatch_rate_limited_total", "mode" => MODE_ROTATING)
                        .increment(1);
                    self.pool
                        .mark_rate_limited(&key, self.config.cooldown())
                        .await;
                    if attempt < max_attempts {
                        warn!(
                            attempt,
                            key = key.id(),
                            retry_in_secs = backoff.as_secs(),
                            "rate limited, rotating key"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        metrics::counter!("dispatch_exhausted_total", "mode" => MODE_ROTATING).increment(1);
        warn!(attempts = max_attempts, "rate limited on every attempt");
        Err(Error::Exhausted(format!(
            "rate limited on all {max_attempts} attempts"
        )))
    }

    /// Sticky dispatch: every attempt runs `work` with `credential`.
    ///
    /// A rate-limited attempt cools the key down in the pool for the
    /// classifier's suggested wait (so rotating traffic avoids it), sleeps the
    /// same wait, and retries with the same key. A fatal error returns at once.
    /// Running out of attempts returns `StickyExhausted`.
    #[instrument(skip_all, fields(call_id = %uuid::Uuid::new_v4().as_simple(), key = %credential))]
    pub async fn dispatch_sticky<T, F, Fut>(
        &self,
        credential: &Credential,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = provider::Result<T>>,
    {
        let max_attempts = self.config.sticky_max_attempts;

        for attempt in 1..=max_attempts {
            metrics::counter!("dispatch_attempts_total", "mode" => MODE_STICKY).increment(1);

            let err = match work(credential.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "sticky dispatch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match classify(&err) {
                ErrorClassification::Fatal => {
                    metrics::counter!("dispatch_fatal_total", "mode" => MODE_STICKY).increment(1);
                    warn!(
                        status = ?err.status,
                        error = %err,
                        "fatal upstream error on sticky key"
                    );
                    return Err(Error::Upstream(err));
                }
                ErrorClassification::RateLimited { wait } => {
                    metrics::counter!("dispatch_rate_limited_total", "mode" => MODE_STICKY)
                        .increment(1);
                    self.pool.mark_rate_limited(credential, wait).await;
                    if attempt < max_attempts {
                        warn!(
                            attempt,
                            retry_in_secs = wait.as_secs_f64(),
                            "sticky key rate limited, waiting"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        metrics::counter!("dispatch_exhausted_total", "mode" => MODE_STICKY).increment(1);
        warn!(
            attempts = max_attempts,
            "sticky key rate limited on every attempt"
        );
        Err(Error::StickyExhausted {
            credential: credential.id().to_string(),
            attempts: max_attempts,
        })
    }
}
