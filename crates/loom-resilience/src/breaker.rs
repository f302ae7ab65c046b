//! Circuit breaker guarding one remote endpoint.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::CircuitOpen;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Thresholds and cooldowns for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before the breaker opens.
    pub failure_threshold: u32,
    /// Initial time spent Open before a trial call is allowed.
    pub cooldown: Duration,
    /// Ceiling for the cooldown after repeated failed trials.
    pub max_cooldown: Duration,
    /// Multiplier applied to the cooldown when a trial fails.
    pub backoff_factor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            max_cooldown: DEFAULT_MAX_COOLDOWN.max(cooldown),
            ..Self::default()
        }
    }

    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown.max(self.cooldown);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        self
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub cooldown: Duration,
    /// Time left before a trial is allowed, when Open.
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

/// Closed / Open / HalfOpen breaker.
///
/// Callers obtain a [`BreakerPermit`] with [`try_acquire`](Self::try_acquire)
/// before attempting the guarded call and report the outcome on the permit.
/// While HalfOpen exactly one permit (the trial) is outstanding; other
/// callers are rejected until the trial resolves.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                cooldown: config.cooldown,
                trial_in_flight: false,
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let retry_in = match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(opened)) => {
                Some(inner.cooldown.saturating_sub(opened.elapsed()))
            }
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.failures,
            cooldown: inner.cooldown,
            retry_in,
        }
    }

    /// Ask permission to attempt a call.
    ///
    /// An Open breaker whose cooldown has elapsed moves to HalfOpen and hands
    /// out the single trial permit.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(BreakerPermit::new(self, false)),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = %self.name, "Circuit half-open, allowing trial call");
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(self.rejection(inner.cooldown - elapsed))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.rejection(Duration::ZERO))
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    /// Force the breaker back to Closed with a fresh cooldown.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.cooldown = self.config.cooldown;
        inner.trial_in_flight = false;
    }

    fn rejection(&self, retry_in: Duration) -> CircuitOpen {
        CircuitOpen {
            name: self.name.clone(),
            retry_in,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen if trial => {
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.cooldown = self.config.cooldown;
                inner.trial_in_flight = false;
                tracing::info!(breaker = %self.name, "Circuit closed");
            }
            // Stale permit from before the breaker tripped.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen if trial => {
                let next = inner.cooldown.mul_f64(self.config.backoff_factor);
                inner.cooldown = next.min(self.config.max_cooldown);
                inner.failures += 1;
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                tracing::warn!(
                    breaker = %self.name,
                    cooldown_ms = inner.cooldown.as_millis() as u64,
                    "Trial call failed, circuit reopened"
                );
            }
            _ => {}
        }
    }

    fn on_abandon(&self, trial: bool) {
        if trial {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }
}

/// Permission to attempt one guarded call.
///
/// Dropping a permit without reporting an outcome (for instance when the
/// caller's future is cancelled) releases a HalfOpen trial slot without
/// changing the breaker state.
#[must_use = "report the call outcome with succeed() or fail()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this permit is the HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandon(self.trial);
        }
    }
}
