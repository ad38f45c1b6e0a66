//! Acquisition orchestrator.
//!
//! Drives one run end to end: release sports still loaded from earlier
//! runs, warm up the requested one, page through the projection source, optionally narrow
//! to upcoming games, enrich a bounded candidate set and publish. A run
//! that fails outside the tolerant stages is retried whole, with backoff,
//! up to `max_attempts` times.
//!
//! Only the most recently started session may publish. Starting a new
//! session cancels the previous one; an identical request already in
//! flight is refused.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::enricher::BoundedEnricher;
use super::game_filter::{filter_upcoming, team_names};
use super::lifecycle::{SportLifecycle, SportRecord};
use super::paginator::Paginator;
use super::session::{FetchSession, RunRequest};
use super::status::{PipelineSnapshot, StatusPublisher, StatusUpdate};
use crate::config::{BreakerConfig, PipelineConfig};
use crate::resilience::{sleep_unless_cancelled, Backoff, CallGuard};
use crate::services::{Collaborators, UpcomingGamesProvider};
use crate::types::{EnrichedProjection, PipelineError, Sport, SportStatus, Stage};

const FETCH_PROGRESS_START: f64 = 20.0;
const FETCH_PROGRESS_SPAN: f64 = 30.0;

/// How a driven session ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        projections: Arc<Vec<EnrichedProjection>>,
        enriched: bool,
        attempts: u32,
    },
    /// Retries exhausted. `projections` is the previously published set,
    /// which stays visible to the consumer.
    Failed {
        error: PipelineError,
        attempts: u32,
        projections: Arc<Vec<EnrichedProjection>>,
    },
    /// A newer session took over; nothing from this one was kept.
    Superseded,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, RunOutcome::Superseded)
    }

    pub fn projections(&self) -> Option<&Arc<Vec<EnrichedProjection>>> {
        match self {
            RunOutcome::Completed { projections, .. } | RunOutcome::Failed { projections, .. } => {
                Some(projections)
            }
            RunOutcome::Superseded => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RunOutcome::Completed { attempts, .. } | RunOutcome::Failed { attempts, .. } => *attempts,
            RunOutcome::Superseded => 0,
        }
    }
}

struct ActiveSession {
    id: Uuid,
    request: RunRequest,
    token: CancellationToken,
}

#[derive(Default)]
struct SessionRegistry {
    active: Option<ActiveSession>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    lifecycle: SportLifecycle,
    paginator: Paginator,
    enricher: BoundedEnricher,
    games: Arc<dyn UpcomingGamesProvider>,
    games_guard: CallGuard,
    backoff: Backoff,
    publisher: StatusPublisher,
    sessions: Mutex<SessionRegistry>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        config: PipelineConfig,
        breaker: &BreakerConfig,
        call_timeout: Duration,
    ) -> Self {
        let guard = |name: &'static str| CallGuard::from_config(name, breaker, call_timeout);

        Self {
            lifecycle: SportLifecycle::new(collaborators.activator, guard("sport-activator")),
            paginator: Paginator::new(
                collaborators.source,
                guard("projection-source"),
                config.page_size,
                config.offset_ceiling,
            ),
            enricher: BoundedEnricher::new(
                collaborators.enrichment,
                guard("enrichment"),
                config.enrichment_cap,
            ),
            games: collaborators.games,
            games_guard: guard("upcoming-games"),
            backoff: Backoff::new(config.retry_base_delay(), config.retry_max_delay()),
            publisher: StatusPublisher::new(),
            sessions: Mutex::new(SessionRegistry::default()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.publisher.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<StatusUpdate> {
        self.publisher.events()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.publisher.snapshot()
    }

    pub fn sport_status(&self, sport: &Sport) -> SportStatus {
        self.lifecycle.status(sport)
    }

    pub fn sport_records(&self) -> BTreeMap<String, SportRecord> {
        self.lifecycle.records()
    }

    /// The request currently in flight, if any.
    pub fn in_flight(&self) -> Option<RunRequest> {
        self.lock_sessions()
            .active
            .as_ref()
            .filter(|a| !a.token.is_cancelled())
            .map(|a| a.request.clone())
    }

    /// Start a session for `request`.
    ///
    /// Returns `None` when an identical request is already in flight.
    /// Otherwise the previous session is cancelled and the new one becomes
    /// the only one allowed to publish.
    pub fn begin(&self, request: RunRequest) -> Option<FetchSession> {
        self.begin_with_attempts(request, 0)
    }

    /// `begin` for a caller resuming a run that already used `spent`
    /// attempts. At least one attempt is always left.
    pub fn begin_with_attempts(&self, request: RunRequest, spent: u32) -> Option<FetchSession> {
        let mut sessions = self.lock_sessions();

        if let Some(active) = &sessions.active {
            if active.request == request && !active.token.is_cancelled() {
                debug!(
                    sport = %request.sport,
                    prop_type = %request.prop_type,
                    stat_filter = %request.stat_filter,
                    "Identical run already in flight; not starting another"
                );
                return None;
            }
            active.token.cancel();
            info!(superseded = %active.id, "Previous session superseded");
        }

        let session = FetchSession::new(request.clone())
            .with_attempts_spent(spent, self.config.max_attempts);
        sessions.active = Some(ActiveSession {
            id: session.id(),
            request,
            token: session.token().clone(),
        });
        Some(session)
    }

    /// Run `session` to a terminal state, retrying the whole run on
    /// run-level errors.
    pub async fn drive(&self, mut session: FetchSession) -> RunOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();

        info!(
            session_id = %session.id(),
            sport = %session.sport(),
            prop_type = %session.request().prop_type,
            stat_filter = %session.request().stat_filter,
            "Starting projection run"
        );

        let outcome = loop {
            session.attempt += 1;
            let attempt = session.attempt;

            let err = match self.run_attempt(&mut session).await {
                Ok((projections, enriched)) => {
                    info!(
                        session_id = %session.id(),
                        sport = %session.sport(),
                        attempt,
                        published = projections.len(),
                        enriched,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Projection run complete"
                    );
                    break RunOutcome::Completed {
                        projections,
                        enriched,
                        attempts: attempt,
                    };
                }
                Err(PipelineError::Superseded) => break RunOutcome::Superseded,
                Err(e) => e,
            };

            if attempt >= max_attempts {
                error!(
                    session_id = %session.id(),
                    sport = %session.sport(),
                    attempts = attempt,
                    error = %err,
                    "Projection run failed; retries exhausted"
                );
                let error = PipelineError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                };
                break match self.publisher.fail(&mut session, &error) {
                    Ok(previous) => RunOutcome::Failed {
                        error,
                        attempts: attempt,
                        projections: previous,
                    },
                    Err(_) => RunOutcome::Superseded,
                };
            }

            let delay = self.backoff.delay_after(attempt);
            warn!(
                session_id = %session.id(),
                sport = %session.sport(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Projection run failed; retrying"
            );
            let progress = session.progress;
            let message = format!(
                "Retrying in {:.1}s (attempt {} of {})",
                delay.as_secs_f64(),
                attempt + 1,
                max_attempts
            );
            if self
                .publisher
                .stage(&mut session, Stage::Retrying, progress, Some(message))
                .is_err()
            {
                break RunOutcome::Superseded;
            }
            if !sleep_unless_cancelled(delay, session.token()).await {
                break RunOutcome::Superseded;
            }
        };

        if outcome.is_superseded() {
            debug!(session_id = %session.id(), "Session superseded; results discarded");
        }
        self.release(&session);
        outcome
    }

    /// `begin` then `drive`. `None` when an identical run is in flight.
    pub async fn run(&self, request: RunRequest) -> Option<RunOutcome> {
        let session = self.begin(request)?;
        Some(self.drive(session).await)
    }

    async fn run_attempt(
        &self,
        session: &mut FetchSession,
    ) -> Result<(Arc<Vec<EnrichedProjection>>, bool), PipelineError> {
        let token = session.token().clone();
        let sport = session.sport().clone();

        self.publisher.stage(
            session,
            Stage::Initializing,
            0,
            Some(format!("Preparing {sport} projections")),
        )?;

        for previous in self.lifecycle.loaded_except(&sport) {
            self.lifecycle.deactivate(&previous, &token).await;
        }

        if !sport.is_all() {
            self.publisher.stage(
                session,
                Stage::ActivatingSport,
                10,
                Some(format!("Activating {sport}")),
            )?;
            self.lifecycle.activate(&sport, &token).await;
        }
        session.ensure_live()?;

        let stat_types = session
            .request()
            .stat_filter
            .resolve(&self.config.stat_presets)?;
        let prop_type = session.request().prop_type.clone();

        let publisher = &self.publisher;
        let collected = self
            .paginator
            .collect(&sport, &prop_type, &stat_types, &token, |page| {
                let progress = FETCH_PROGRESS_START + page.fraction() * FETCH_PROGRESS_SPAN;
                publisher.stage(
                    session,
                    Stage::FetchingBatches,
                    progress.round() as u8,
                    Some(format!("Fetching projections ({} so far)", page.accumulated)),
                )
            })
            .await?;
        let mut projections = collected.projections;

        if self.config.filter_upcoming {
            self.publisher.stage(
                session,
                Stage::Filtering,
                55,
                Some("Filtering to upcoming games".to_string()),
            )?;
            let teams = self.upcoming_teams(&sport).await;
            session.ensure_live()?;

            if teams.is_empty() {
                debug!(sport = %sport, "No upcoming teams; keeping all projections");
            } else {
                let before = projections.len();
                projections = filter_upcoming(projections, &teams);
                info!(
                    sport = %sport,
                    teams = teams.len(),
                    before,
                    after = projections.len(),
                    "Filtered to upcoming games"
                );
            }
        }

        let candidates = projections.len().min(self.enricher.cap());
        self.publisher.stage(
            session,
            Stage::Enriching,
            60,
            Some(format!("Enriching {candidates} projections")),
        )?;
        let outcome = self.enricher.enrich(projections, &token).await?;

        let published = self
            .publisher
            .complete(session, outcome.projections, outcome.enriched)?;
        Ok((published, outcome.enriched))
    }

    /// Team names playing soon. Empty when the schedule is unavailable,
    /// which leaves the projections unfiltered.
    async fn upcoming_teams(&self, sport: &Sport) -> BTreeSet<String> {
        match self.games_guard.call(self.games.upcoming_games(sport)).await {
            Ok(games) => team_names(&games),
            Err(e) => {
                warn!(
                    sport = %sport,
                    collaborator = self.games_guard.collaborator(),
                    error = %e,
                    "Upcoming games unavailable; skipping filter"
                );
                BTreeSet::new()
            }
        }
    }

    fn release(&self, session: &FetchSession) {
        let mut sessions = self.lock_sessions();
        if sessions.active.as_ref().is_some_and(|a| a.id == session.id()) {
            sessions.active = None;
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, SessionRegistry> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
