//! Remote collaborators of the acquisition pipeline.
//!
//! Defines one trait per backend contract and provides HTTP
//! implementations for the analytics backend:
//! - `SportActivator`: load / release per-sport compute resources
//! - `ProjectionSource`: paged raw projections
//! - `EnrichmentService`: batch model predictions
//! - `UpcomingGamesProvider`: scheduled games used for filtering

pub mod client;
pub mod enrichment;
pub mod games;
pub mod projections;
pub mod sports;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

use crate::types::{
    ActivationReport, DeactivationReport, EnrichedProjection, Game, Projection, Sport,
};

/// Page request sent to the projection source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    pub sport: Sport,
    pub prop_type: String,
    pub stat_types: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Prepares or tears down a sport's remote models and caches.
///
/// Both calls are idempotent; redundant calls are harmless.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SportActivator: Send + Sync {
    async fn activate_sport(&self, sport: &Sport) -> Result<ActivationReport>;

    async fn deactivate_sport(&self, sport: &Sport) -> Result<DeactivationReport>;
}

/// Pages of projections for a sport / prop type / stat filter.
///
/// A page shorter than `query.limit` signals the end of the data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProjectionSource: Send + Sync {
    async fn fetch_batch(&self, query: &BatchQuery) -> Result<Vec<Projection>>;
}

/// Model predictions for a bounded batch of projections.
///
/// An empty result means "no enrichment available", not a failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn enrich_batch(&self, projections: &[Projection]) -> Result<Vec<EnrichedProjection>>;
}

/// Games about to start for a sport.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpcomingGamesProvider: Send + Sync {
    async fn upcoming_games(&self, sport: &Sport) -> Result<Vec<Game>>;
}

/// The four collaborators one orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub activator: Arc<dyn SportActivator>,
    pub source: Arc<dyn ProjectionSource>,
    pub enrichment: Arc<dyn EnrichmentService>,
    pub games: Arc<dyn UpcomingGamesProvider>,
}
