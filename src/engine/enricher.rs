//! Bounded enrichment.
//!
//! Sends at most `cap` projections to the enrichment service. A non-empty
//! response publishes the capped candidate set with predictions attached;
//! an empty response or a failed call publishes every projection
//! unenriched so nothing is lost.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::resilience::CallGuard;
use crate::services::EnrichmentService;
use crate::types::{EnrichedProjection, PipelineError, Prediction, Projection};

#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub projections: Vec<EnrichedProjection>,
    /// Whether the enrichment service contributed the result set.
    pub enriched: bool,
    pub candidates: usize,
}

pub struct BoundedEnricher {
    service: Arc<dyn EnrichmentService>,
    guard: CallGuard,
    cap: usize,
}

impl BoundedEnricher {
    pub fn new(service: Arc<dyn EnrichmentService>, guard: CallGuard, cap: usize) -> Self {
        Self { service, guard, cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub async fn enrich(
        &self,
        projections: Vec<Projection>,
        token: &CancellationToken,
    ) -> Result<EnrichmentOutcome, PipelineError> {
        let candidates = projections.len().min(self.cap);
        if candidates == 0 {
            return Ok(fallback(projections, 0));
        }
        if token.is_cancelled() {
            return Err(PipelineError::Superseded);
        }

        let result = self
            .guard
            .call(self.service.enrich_batch(&projections[..candidates]))
            .await;

        if token.is_cancelled() {
            return Err(PipelineError::Superseded);
        }

        match result {
            Ok(enriched) if !enriched.is_empty() => {
                let mut predictions: HashMap<String, Option<Prediction>> = enriched
                    .into_iter()
                    .map(|e| (e.projection.id, e.prediction))
                    .collect();

                let published: Vec<EnrichedProjection> = projections
                    .into_iter()
                    .take(candidates)
                    .map(|p| {
                        let prediction = predictions.remove(&p.id).flatten();
                        EnrichedProjection {
                            projection: p,
                            prediction,
                        }
                    })
                    .collect();

                let with_prediction = published.iter().filter(|p| p.is_enriched()).count();
                info!(
                    candidates,
                    with_prediction,
                    "Enrichment applied to candidate set"
                );
                Ok(EnrichmentOutcome {
                    projections: published,
                    enriched: true,
                    candidates,
                })
            }
            Ok(_) => {
                info!(candidates, total = projections.len(), "No enrichment available; publishing unenriched");
                Ok(fallback(projections, candidates))
            }
            Err(e) => {
                warn!(
                    candidates,
                    total = projections.len(),
                    error = %e,
                    "Enrichment failed; publishing unenriched"
                );
                Ok(fallback(projections, candidates))
            }
        }
    }
}

fn fallback(projections: Vec<Projection>, candidates: usize) -> EnrichmentOutcome {
    EnrichmentOutcome {
        projections: projections
            .into_iter()
            .map(EnrichedProjection::unenriched)
            .collect(),
        enriched: false,
        candidates,
    }
}
