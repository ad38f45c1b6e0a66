//! Per-call guard: circuit breaker check plus a hard timeout.
//!
//! Every collaborator call in the pipeline goes through a `CallGuard`, so a
//! hung backend can never stall a run. A refused or timed-out call comes
//! back as an ordinary `Err` and is handled exactly like a failed call.
//! A call whose future is dropped before it settles is abandoned and does
//! not count against the collaborator.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::BreakerConfig;
use crate::types::PipelineError;

#[derive(Debug, Clone)]
pub struct CallGuard {
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl CallGuard {
    pub fn new(breaker: CircuitBreaker, timeout: Duration) -> Self {
        Self { breaker, timeout }
    }

    pub fn from_config(collaborator: &'static str, cfg: &BreakerConfig, timeout: Duration) -> Self {
        Self::new(CircuitBreaker::from_config(collaborator, cfg), timeout)
    }

    pub fn collaborator(&self) -> &'static str {
        self.breaker.collaborator()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `call` under the breaker and timeout.
    pub async fn call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let collaborator = self.collaborator();

        let permit = self.breaker.admit().map_err(|open| {
            debug!(
                collaborator,
                retry_in_ms = open.retry_in.as_millis() as u64,
                "Call refused; collaborator cooling down"
            );
            anyhow!(PipelineError::CircuitOpen(collaborator.to_string()))
        })?;

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                permit.succeeded();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failed();
                Err(e)
            }
            Err(_) => {
                permit.failed();
                warn!(
                    collaborator,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Collaborator call timed out"
                );
                Err(anyhow!(PipelineError::Timeout {
                    collaborator: collaborator.to_string(),
                    secs: self.timeout.as_secs_f64(),
                }))
            }
        }
    }
}
