//! Request-weight budget for a rate-limited provider.
//!
//! Every API call consumes weight. When the consumed weight reaches the
//! ceiling, the next caller waits a full cooldown and the budget resets to
//! zero. This is a blunt policy: there is no per-second decay.

use super::provider::DataError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Blocking wait abstraction so the cooldown can be faked in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {}
}

/// Sleeper that returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All waits requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits equal to `duration`.
    pub fn count_of(&self, duration: Duration) -> usize {
        self.waits().iter().filter(|d| **d == duration).count()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// Limiter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Weight ceiling per window.
    pub max_weight: u64,
    /// Wait applied once the ceiling is reached.
    pub cooldown: Duration,
    /// Cap on the sum of all cooldowns. `None` waits forever.
    pub max_total_wait: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_weight: 6000,
            cooldown: Duration::from_secs(60),
            max_total_wait: Some(Duration::from_secs(30 * 60)),
        }
    }
}

#[derive(Debug, Default)]
struct Budget {
    used: u64,
    cooldowns: u32,
    total_waited: Duration,
}

/// Process-wide request budget, shared by reference between fetches.
pub struct RateLimiter {
    config: RateLimitConfig,
    budget: Mutex<Budget>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            config,
            budget: Mutex::new(Budget::default()),
            sleeper,
        }
    }

    /// Default limiter: 6000 weight per minute, real sleeps.
    pub fn default_provider() -> Self {
        Self::new(RateLimitConfig::default(), Arc::new(ThreadSleeper))
    }

    /// Add `weight` to the consumed budget.
    pub fn consume(&self, weight: u64) {
        let mut budget = self.lock();
        budget.used = budget.used.saturating_add(weight);
    }

    /// Wait out a cooldown if the budget is exhausted.
    pub fn check(&self) -> Result<(), DataError> {
        let mut budget = self.lock();
        self.cool_down_if_exhausted(&mut budget)
    }

    /// Check and consume in a single critical section.
    ///
    /// Concurrent callers serialize here, so the budget cannot be overrun
    /// between the check and the consume. A cooldown holds the lock, which
    /// stalls every other caller for the same wait.
    pub fn acquire(&self, weight: u64) -> Result<(), DataError> {
        let mut budget = self.lock();
        self.cool_down_if_exhausted(&mut budget)?;
        budget.used = budget.used.saturating_add(weight);
        Ok(())
    }

    fn cool_down_if_exhausted(&self, budget: &mut Budget) -> Result<(), DataError> {
        if budget.used < self.config.max_weight {
            return Ok(());
        }

        if let Some(cap) = self.config.max_total_wait {
            if budget.total_waited + self.config.cooldown > cap {
                return Err(DataError::RateLimitWaitExceeded {
                    waited_secs: budget.total_waited.as_secs(),
                    cap_secs: cap.as_secs(),
                });
            }
        }

        tracing::warn!(
            used = budget.used,
            ceiling = self.config.max_weight,
            "request weight ceiling reached, waiting {}s",
            self.config.cooldown.as_secs()
        );
        self.sleeper.sleep(self.config.cooldown);
        budget.used = 0;
        budget.cooldowns += 1;
        budget.total_waited += self.config.cooldown;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Budget> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Weight consumed since the last reset.
    pub fn used(&self) -> u64 {
        self.lock().used
    }

    pub fn ceiling(&self) -> u64 {
        self.config.max_weight
    }

    /// Number of cooldowns served so far.
    pub fn cooldowns(&self) -> u32 {
        self.lock().cooldowns
    }

    /// Sum of all cooldown waits so far.
    pub fn total_waited(&self) -> Duration {
        self.lock().total_waited
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("used", &self.used())
            .finish()
    }
}
