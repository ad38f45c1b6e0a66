//! Sport activation endpoints.
//!
//! The backend loads models and caches for a sport on demand and frees
//! them on request, so only the sport the user is looking at holds memory.
//!
//! - `POST /api/v2/sports/activate`   body `{"sport": "MLB"}`
//! - `POST /api/v2/sports/deactivate` body `{"sport": "MLB"}`

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::BackendClient;
use super::SportActivator;
use crate::types::{ActivationReport, DeactivationReport, Sport};

const ACTIVATE_PATH: &str = "/api/v2/sports/activate";
const DEACTIVATE_PATH: &str = "/api/v2/sports/deactivate";

#[derive(Debug, Serialize)]
struct SportRequest<'a> {
    sport: &'a str,
}

/// Activation response. Older backends wrap it under `data`.
#[derive(Debug, Deserialize, Default)]
struct ActivateResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default)]
    newly_loaded: bool,
    #[serde(default)]
    load_time: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Box<ActivateResponse>>,
}

#[derive(Debug, Deserialize)]
struct DeactivateResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ok: Option<bool>,
}

/// HTTP `SportActivator` against the analytics backend.
pub struct HttpSportActivator {
    backend: BackendClient,
}

impl HttpSportActivator {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    fn into_report(resp: ActivateResponse) -> ActivationReport {
        let resp = match resp.data {
            Some(inner) => *inner,
            None => resp,
        };
        let ready = resp
            .ready
            .unwrap_or_else(|| resp.status.as_deref() == Some("ready"));
        if let Some(err) = &resp.error {
            debug!(error = %err, "Activation response carried an error");
        }
        ActivationReport {
            ready,
            newly_loaded: resp.newly_loaded,
            load_time_seconds: resp.load_time.filter(|t| t.is_finite() && *t >= 0.0),
        }
    }

    /// `deactivated`, `not_loaded` and `delayed` all leave the backend in a
    /// consistent state; only `error` counts as a failure.
    fn into_deactivation(resp: DeactivateResponse) -> DeactivationReport {
        let ok = resp.ok.unwrap_or_else(|| {
            matches!(
                resp.status.as_deref(),
                Some("deactivated") | Some("not_loaded") | Some("delayed") | Some("ok")
            )
        });
        DeactivationReport { ok }
    }
}

#[async_trait]
impl SportActivator for HttpSportActivator {
    async fn activate_sport(&self, sport: &Sport) -> Result<ActivationReport> {
        let resp: ActivateResponse = self
            .backend
            .post_json(ACTIVATE_PATH, &SportRequest { sport: sport.id() })
            .await
            .with_context(|| format!("Failed to activate {sport}"))?;
        Ok(Self::into_report(resp))
    }

    async fn deactivate_sport(&self, sport: &Sport) -> Result<DeactivationReport> {
        let resp: DeactivateResponse = self
            .backend
            .post_json(DEACTIVATE_PATH, &SportRequest { sport: sport.id() })
            .await
            .with_context(|| format!("Failed to deactivate {sport}"))?;
        Ok(Self::into_deactivation(resp))
    }
}
