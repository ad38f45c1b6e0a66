//! Sport resource lifecycle.
//!
//! Tracks each sport's activation status and drives the remote activator.
//! Activation and deactivation failures are logged and swallowed here:
//! losing the warm-up only makes the first fetch slower, it never blocks
//! the pipeline. Status writes from a cancelled session are discarded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::CallGuard;
use crate::services::SportActivator;
use crate::types::{ActivationReport, Sport, SportStatus};

/// What we know about one sport's remote resources.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct SportRecord {
    pub status: SportStatus,
    pub newly_loaded: Option<bool>,
    pub load_time_seconds: Option<f64>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct SportLifecycle {
    activator: Arc<dyn SportActivator>,
    guard: CallGuard,
    records: RwLock<HashMap<Sport, SportRecord>>,
}

impl SportLifecycle {
    pub fn new(activator: Arc<dyn SportActivator>, guard: CallGuard) -> Self {
        Self {
            activator,
            guard,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Current status; sports never referenced before are inactive.
    pub fn status(&self, sport: &Sport) -> SportStatus {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sport)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn records(&self) -> BTreeMap<String, SportRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(sport, record)| (sport.id().to_string(), record.clone()))
            .collect()
    }

    /// Sports whose backend resources may still be held, other than
    /// `requested`. A sport left `Loading` counts: its activation may have
    /// landed on the backend after a stale session's status write was
    /// discarded.
    pub fn loaded_except(&self, requested: &Sport) -> Vec<Sport> {
        let mut loaded: Vec<Sport> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(sport, record)| {
                *sport != requested
                    && matches!(record.status, SportStatus::Ready | SportStatus::Loading)
            })
            .map(|(sport, _)| sport.clone())
            .collect();
        loaded.sort_by(|a, b| a.id().cmp(b.id()));
        loaded
    }

    /// Ask the backend to load `sport`. Returns the report when the call
    /// succeeded (ready or not), `None` when it failed or the session went
    /// stale first.
    pub async fn activate(
        &self,
        sport: &Sport,
        token: &CancellationToken,
    ) -> Option<ActivationReport> {
        if !self.update(sport, token, |r| r.status = SportStatus::Loading) {
            return None;
        }

        let started = Instant::now();
        match self.guard.call(self.activator.activate_sport(sport)).await {
            Ok(report) if report.ready => {
                info!(
                    sport = %sport,
                    newly_loaded = report.newly_loaded,
                    load_time_secs = ?report.load_time_seconds,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sport activated"
                );
                self.update(sport, token, |r| {
                    r.status = SportStatus::Ready;
                    r.newly_loaded = Some(report.newly_loaded);
                    r.load_time_seconds = report.load_time_seconds;
                    r.last_error = None;
                });
                Some(report)
            }
            Ok(report) => {
                warn!(sport = %sport, "Activator reported sport not ready; fetching anyway");
                self.update(sport, token, |r| {
                    r.status = SportStatus::Error;
                    r.last_error = Some("activator reported not ready".to_string());
                });
                Some(report)
            }
            Err(e) => {
                warn!(sport = %sport, error = %e, "Sport activation failed; fetching anyway");
                self.update(sport, token, |r| {
                    r.status = SportStatus::Error;
                    r.last_error = Some(e.to_string());
                });
                None
            }
        }
    }

    /// Ask the backend to release `sport`. Best effort; returns whether the
    /// backend confirmed.
    pub async fn deactivate(&self, sport: &Sport, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }

        match self.guard.call(self.activator.deactivate_sport(sport)).await {
            Ok(report) if report.ok => {
                debug!(sport = %sport, "Sport deactivated");
                self.update(sport, token, |r| {
                    r.status = SportStatus::Inactive;
                    r.newly_loaded = None;
                    r.last_error = None;
                });
                true
            }
            Ok(_) => {
                warn!(sport = %sport, "Deactivation not confirmed; continuing");
                self.update(sport, token, |r| {
                    r.status = SportStatus::Error;
                    r.last_error = Some("deactivation not confirmed".to_string());
                });
                false
            }
            Err(e) => {
                warn!(sport = %sport, error = %e, "Sport deactivation failed; continuing");
                self.update(sport, token, |r| {
                    r.status = SportStatus::Error;
                    r.last_error = Some(e.to_string());
                });
                false
            }
        }
    }

    /// Apply `change` unless the session is stale. The check happens under
    /// the write lock so a superseded session cannot overwrite its successor.
    fn update(
        &self,
        sport: &Sport,
        token: &CancellationToken,
        change: impl FnOnce(&mut SportRecord),
    ) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            debug!(sport = %sport, "Discarding sport status update from stale session");
            return false;
        }
        let record = records.entry(sport.clone()).or_default();
        change(record);
        record.updated_at = Some(Utc::now());
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
