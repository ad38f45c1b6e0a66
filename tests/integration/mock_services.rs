//! Scripted in-memory collaborators for integration testing.
//!
//! Each mock records what it was asked for and answers from a script set
//! up by the test, with no network involved.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use propline::config::{BreakerConfig, PipelineConfig};
use propline::engine::Orchestrator;
use propline::services::{
    BatchQuery, Collaborators, EnrichmentService, ProjectionSource, SportActivator,
    UpcomingGamesProvider,
};
use propline::types::*;

// ---------------------------------------------------------------------------
// Projection source
// ---------------------------------------------------------------------------

/// Serves pages of a scripted size. `Some(n)` answers with `n` projections,
/// `None` fails the request, and calls past the end of the script get an
/// empty page.
pub struct ScriptedSource {
    pages: Vec<Option<usize>>,
    matchups: Vec<String>,
    queries: Mutex<Vec<BatchQuery>>,
    /// Requests for this sport wait on `release` before answering.
    gated_sport: Option<Sport>,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Option<usize>>) -> Self {
        Self {
            pages,
            matchups: vec!["New York Yankees @ Boston Red Sox".to_string()],
            queries: Mutex::new(Vec::new()),
            gated_sport: None,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Assign matchup texts round-robin to generated projections.
    pub fn with_matchups(mut self, matchups: &[&str]) -> Self {
        self.matchups = matchups.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn gated_on(mut self, sport: &str) -> Self {
        self.gated_sport = Some(Sport::new(sport));
        self
    }

    pub fn queries(&self) -> Vec<BatchQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<usize> {
        self.queries().iter().map(|q| q.offset).collect()
    }

    fn projections(&self, sport: &Sport, offset: usize, len: usize) -> Vec<Projection> {
        (0..len)
            .map(|i| {
                let n = offset + i;
                Projection {
                    id: format!("{sport}-{n}"),
                    player: format!("Player {n}"),
                    stat_type: Some("hits".to_string()),
                    line: None,
                    confidence: None,
                    matchup: Some(self.matchups[n % self.matchups.len()].clone()),
                    raw: Value::Null,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ProjectionSource for ScriptedSource {
    async fn fetch_batch(&self, query: &BatchQuery) -> Result<Vec<Projection>> {
        let call = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len() - 1
        };

        if self.gated_sport.as_ref() == Some(&query.sport) {
            self.entered.notify_one();
            self.release.notified().await;
        }

        match self.pages.get(call) {
            Some(Some(len)) => Ok(self.projections(&query.sport, query.offset, *len)),
            Some(None) => Err(anyhow!("HTTP 502 Bad Gateway at offset {}", query.offset)),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sport activator
// ---------------------------------------------------------------------------

/// Records every call as `"activate:MLB"` / `"deactivate:NBA"`.
#[derive(Default)]
pub struct RecordingActivator {
    calls: Mutex<Vec<String>>,
    failing: HashSet<Sport>,
}

impl RecordingActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activation and deactivation of `sport` fail.
    pub fn failing_for(mut self, sport: &str) -> Self {
        self.failing.insert(Sport::new(sport));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SportActivator for RecordingActivator {
    async fn activate_sport(&self, sport: &Sport) -> Result<ActivationReport> {
        self.calls.lock().unwrap().push(format!("activate:{sport}"));
        if self.failing.contains(sport) {
            return Err(anyhow!("503 Service Unavailable activating {sport}"));
        }
        Ok(ActivationReport {
            ready: true,
            newly_loaded: true,
            load_time_seconds: Some(0.8),
        })
    }

    async fn deactivate_sport(&self, sport: &Sport) -> Result<DeactivationReport> {
        self.calls.lock().unwrap().push(format!("deactivate:{sport}"));
        if self.failing.contains(sport) {
            return Err(anyhow!("503 Service Unavailable deactivating {sport}"));
        }
        Ok(DeactivationReport { ok: true })
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentMode {
    /// Attach a prediction to every item sent.
    Predict,
    Empty,
    Fail,
}

pub struct MockEnrichment {
    mode: EnrichmentMode,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockEnrichment {
    pub fn new(mode: EnrichmentMode) -> Self {
        Self {
            mode,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrichmentService for MockEnrichment {
    async fn enrich_batch(&self, projections: &[Projection]) -> Result<Vec<EnrichedProjection>> {
        self.batch_sizes.lock().unwrap().push(projections.len());
        match self.mode {
            EnrichmentMode::Predict => Ok(projections
                .iter()
                .map(|p| EnrichedProjection {
                    projection: p.clone(),
                    prediction: Some(Prediction {
                        recommendation: Some("over".to_string()),
                        probability: Some(0.58),
                        ..Prediction::default()
                    }),
                })
                .collect()),
            EnrichmentMode::Empty => Ok(Vec::new()),
            EnrichmentMode::Fail => Err(anyhow!("prediction service timed out")),
        }
    }
}

// ---------------------------------------------------------------------------
// Upcoming games
// ---------------------------------------------------------------------------

pub struct MockGames {
    games: Vec<Game>,
    failing: HashSet<Sport>,
    calls: AtomicUsize,
}

impl MockGames {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            games: labels
                .iter()
                .map(|label| Game {
                    event_name: label.to_string(),
                    ..Game::default()
                })
                .collect(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, sport: &str) -> Self {
        self.failing.insert(Sport::new(sport));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpcomingGamesProvider for MockGames {
    async fn upcoming_games(&self, sport: &Sport) -> Result<Vec<Game>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(sport) {
            return Err(anyhow!("schedule feed unavailable for {sport}"));
        }
        Ok(self.games.clone())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Pipeline knobs with short backoff so retry tests stay fast.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry_base_delay_ms: 5,
        retry_max_delay_ms: 20,
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub activator: Arc<RecordingActivator>,
    pub source: Arc<ScriptedSource>,
    pub enrichment: Arc<MockEnrichment>,
    pub games: Arc<MockGames>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(
        activator: RecordingActivator,
        source: ScriptedSource,
        enrichment: MockEnrichment,
        games: MockGames,
        config: PipelineConfig,
    ) -> Self {
        let activator = Arc::new(activator);
        let source = Arc::new(source);
        let enrichment = Arc::new(enrichment);
        let games = Arc::new(games);

        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                activator: activator.clone(),
                source: source.clone(),
                enrichment: enrichment.clone(),
                games: games.clone(),
            },
            config,
            &BreakerConfig {
                failure_threshold: 1_000,
                ..BreakerConfig::default()
            },
            Duration::from_secs(2),
        ));

        Self {
            activator,
            source,
            enrichment,
            games,
            orchestrator,
        }
    }

    /// Default collaborators around a scripted source.
    pub fn with_source(source: ScriptedSource, enrichment: EnrichmentMode) -> Self {
        Self::new(
            RecordingActivator::new(),
            source,
            MockEnrichment::new(enrichment),
            MockGames::new(&[]),
            fast_config(),
        )
    }
}
