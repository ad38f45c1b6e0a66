//! Per-collaborator circuit breaker.
//!
//! A collaborator that fails `failure_threshold` calls in a row is tripped:
//! until its cooldown ends, calls to it are refused without reaching the
//! backend. After the cooldown a few trial calls are let through. One
//! successful trial restores the collaborator and one failed trial trips it
//! again. The verdict is shared by every session, so the retries of one
//! run and the runs for other sports all see the same state.
//!
//! Each admitted call holds a [`Permit`]. A permit dropped without a
//! verdict belongs to a call that was abandoned, typically because its
//! session was superseded. It frees its trial slot and counts as neither
//! success nor failure.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;

/// Coarse breaker state, as reported to logs and the dashboard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
enum Health {
    /// Normal traffic. `streak` counts consecutive failures.
    Healthy { streak: usize },
    Tripped { until: Instant },
    /// Cooldown over; `trials` calls are in flight.
    Recovering { trials: usize },
}

impl Health {
    fn state(&self) -> CircuitState {
        match self {
            Health::Healthy { .. } => CircuitState::Closed,
            Health::Tripped { .. } => CircuitState::Open,
            Health::Recovering { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    Abandoned,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{collaborator} is cooling down after repeated failures")]
pub struct CircuitOpen {
    pub collaborator: &'static str,
    /// Time left before trial calls are admitted. Zero when the trial
    /// slots are simply all taken.
    pub retry_in: Duration,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    collaborator: &'static str,
    health: Arc<Mutex<Health>>,
    failure_threshold: usize,
    cooldown: Duration,
    trial_calls: usize,
}

impl CircuitBreaker {
    pub fn new(
        collaborator: &'static str,
        failure_threshold: usize,
        cooldown: Duration,
        trial_calls: usize,
    ) -> Self {
        Self {
            collaborator,
            health: Arc::new(Mutex::new(Health::Healthy { streak: 0 })),
            failure_threshold: failure_threshold.max(1),
            cooldown: cooldown.max(Duration::from_millis(1)),
            trial_calls: trial_calls.max(1),
        }
    }

    pub fn from_config(collaborator: &'static str, cfg: &BreakerConfig) -> Self {
        Self::new(
            collaborator,
            cfg.failure_threshold,
            Duration::from_secs(cfg.cooldown_secs),
            cfg.half_open_sample,
        )
    }

    pub fn collaborator(&self) -> &'static str {
        self.collaborator
    }

    pub fn state(&self) -> CircuitState {
        self.health().state()
    }

    /// Consecutive failures counted towards the next trip.
    pub fn failure_streak(&self) -> usize {
        match *self.health() {
            Health::Healthy { streak } => streak,
            Health::Tripped { .. } => self.failure_threshold,
            Health::Recovering { .. } => 0,
        }
    }

    /// Admit one call, or refuse it while the collaborator cools down.
    pub fn admit(&self) -> Result<Permit, CircuitOpen> {
        let mut health = self.health();
        let now = Instant::now();

        if let Health::Tripped { until } = *health {
            if now < until {
                return Err(self.refusal(until - now));
            }
            info!(
                collaborator = self.collaborator,
                "Cooldown over; admitting trial calls"
            );
            *health = Health::Recovering { trials: 0 };
        }

        if let Health::Recovering { trials } = &mut *health {
            if *trials >= self.trial_calls {
                return Err(self.refusal(Duration::ZERO));
            }
            *trials += 1;
        }

        Ok(Permit {
            breaker: self.clone(),
            settled: false,
        })
    }

    fn settle(&self, verdict: Verdict) {
        let mut health = self.health();
        *health = match (*health, verdict) {
            (Health::Recovering { trials }, Verdict::Abandoned) => Health::Recovering {
                trials: trials.saturating_sub(1),
            },
            (Health::Recovering { .. }, Verdict::Success) => {
                info!(collaborator = self.collaborator, "Collaborator recovered");
                Health::Healthy { streak: 0 }
            }
            (Health::Recovering { .. }, Verdict::Failure) => self.trip(self.failure_threshold),
            (Health::Healthy { .. }, Verdict::Success) => Health::Healthy { streak: 0 },
            (Health::Healthy { streak }, Verdict::Failure) => {
                let streak = streak + 1;
                if streak >= self.failure_threshold {
                    self.trip(streak)
                } else {
                    Health::Healthy { streak }
                }
            }
            // Late verdicts from calls admitted before the trip, and
            // abandoned calls outside a trial, change nothing.
            (current, _) => current,
        };
    }

    fn trip(&self, failures: usize) -> Health {
        warn!(
            collaborator = self.collaborator,
            failures,
            cooldown_secs = self.cooldown.as_secs_f64(),
            "Collaborator tripped; refusing calls until cooldown ends"
        );
        Health::Tripped {
            until: Instant::now() + self.cooldown,
        }
    }

    fn refusal(&self, retry_in: Duration) -> CircuitOpen {
        CircuitOpen {
            collaborator: self.collaborator,
            retry_in,
        }
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission for one call. Settle it with [`Permit::succeeded`] or
/// [`Permit::failed`]; dropping it unsettled abandons the call.
#[derive(Debug)]
#[must_use]
pub struct Permit {
    breaker: CircuitBreaker,
    settled: bool,
}

impl Permit {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.settle(Verdict::Success);
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.settle(Verdict::Failure);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(Verdict::Abandoned);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
