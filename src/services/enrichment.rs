//! Enhanced-analysis enrichment service.
//!
//! `POST /v1/unified/batch-predictions` with the candidate projections as a
//! JSON array. The response is an array (or `{"predictions": [...]}`) of
//! prediction records keyed by projection id. Records without an id are
//! matched to the request by position. A response in which no record
//! lands on a requested projection counts as no enrichment at all.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::client::{unwrap_list, BackendClient};
use super::EnrichmentService;
use crate::types::{EnrichedProjection, Prediction, Projection};

const PREDICTIONS_PATH: &str = "/v1/unified/batch-predictions";
const LIST_KEYS: &[&str] = &["predictions", "data", "results"];

/// One prediction record. Fields may be nested under `prediction` or sit
/// at the top level next to the id.
#[derive(Debug, Deserialize)]
struct PredictionRecord {
    #[serde(default, alias = "prop_id", alias = "projection_id")]
    id: Option<Value>,
    #[serde(default)]
    prediction: Option<Prediction>,
    #[serde(flatten)]
    inline: Prediction,
}

impl PredictionRecord {
    fn id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_prediction(self) -> Option<Prediction> {
        let prediction = self.prediction.unwrap_or(self.inline);
        (prediction != Prediction::default()).then_some(prediction)
    }
}

/// HTTP `EnrichmentService` against the analytics backend.
pub struct HttpEnrichmentService {
    backend: BackendClient,
}

impl HttpEnrichmentService {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    fn attach(projections: &[Projection], body: Value) -> Result<Vec<EnrichedProjection>> {
        let records = unwrap_list(body, LIST_KEYS)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<String, Prediction> = HashMap::new();
        let mut by_position: HashMap<usize, Prediction> = HashMap::new();
        for (idx, raw) in records.into_iter().enumerate() {
            let record: PredictionRecord = match serde_json::from_value(raw) {
                Ok(r) => r,
                Err(e) => {
                    debug!(index = idx, error = %e, "Skipping malformed prediction record");
                    continue;
                }
            };
            let id = record.id();
            if let Some(prediction) = record.into_prediction() {
                match id {
                    Some(id) => {
                        by_id.insert(id, prediction);
                    }
                    None => {
                        by_position.insert(idx, prediction);
                    }
                }
            }
        }

        if by_id.is_empty() && by_position.is_empty() {
            debug!("Prediction response carried no usable predictions");
            return Ok(Vec::new());
        }

        let enriched: Vec<EnrichedProjection> = projections
            .iter()
            .enumerate()
            .map(|(idx, p)| EnrichedProjection {
                projection: p.clone(),
                prediction: by_id
                    .remove(&p.id)
                    .or_else(|| by_position.remove(&idx)),
            })
            .collect();

        if enriched.iter().any(EnrichedProjection::is_enriched) {
            Ok(enriched)
        } else {
            debug!("No prediction matched a requested projection");
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl EnrichmentService for HttpEnrichmentService {
    async fn enrich_batch(&self, projections: &[Projection]) -> Result<Vec<EnrichedProjection>> {
        if projections.is_empty() {
            return Ok(Vec::new());
        }
        let body: Value = self
            .backend
            .post_json(PREDICTIONS_PATH, projections)
            .await
            .with_context(|| format!("Enrichment failed for {} projections", projections.len()))?;
        Self::attach(projections, body)
    }
}
