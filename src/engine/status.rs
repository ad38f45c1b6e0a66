//! Consumer-facing stage/progress publishing.
//!
//! The latest state lives in a `watch` channel; every individual update is
//! also broadcast so consumers can follow the full stage sequence. Each
//! publish checks the session's cancellation flag while holding the watch
//! lock, so a superseded session can never publish after its successor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use super::session::FetchSession;
use crate::types::{EnrichedProjection, PipelineError, Sport, Stage};

const EVENT_CAPACITY: usize = 256;

/// One stage/progress/message update.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub session_id: Uuid,
    pub sport: Sport,
    pub stage: Stage,
    pub progress: u8,
    pub message: Option<String>,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// What the consumer currently sees.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PipelineSnapshot {
    pub session_id: Option<Uuid>,
    pub sport: Option<Sport>,
    pub stage: Stage,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub attempt: u32,
    /// Last published result set. Survives failed runs.
    #[serde(skip)]
    pub projections: Arc<Vec<EnrichedProjection>>,
    pub result_count: usize,
    pub enriched: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct StatusPublisher {
    state: watch::Sender<PipelineSnapshot>,
    events: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PipelineSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<StatusUpdate> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.state.borrow().clone()
    }

    /// Move `session` to `stage` and publish it.
    pub(crate) fn stage(
        &self,
        session: &mut FetchSession,
        stage: Stage,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), PipelineError> {
        session.ensure_live()?;
        session.stage = stage;
        session.progress = progress.min(100);
        session.message = message;
        self.publish(session, |snap| {
            if stage == Stage::Initializing {
                snap.error = None;
            }
        })
    }

    /// Publish the final result set; returns the shared handle the
    /// consumer now owns.
    pub(crate) fn complete(
        &self,
        session: &mut FetchSession,
        projections: Vec<EnrichedProjection>,
        enriched: bool,
    ) -> Result<Arc<Vec<EnrichedProjection>>, PipelineError> {
        session.ensure_live()?;
        session.stage = Stage::Complete;
        session.progress = 100;
        session.message = None;

        let published = Arc::new(projections);
        let handle = Arc::clone(&published);
        self.publish(session, move |snap| {
            snap.error = None;
            snap.result_count = published.len();
            snap.enriched = enriched;
            snap.projections = published;
            snap.published_at = Some(Utc::now());
        })?;
        Ok(handle)
    }

    /// Publish a terminal failure, leaving the previous result set in
    /// place. Returns that previous set.
    pub(crate) fn fail(
        &self,
        session: &mut FetchSession,
        error: &PipelineError,
    ) -> Result<Arc<Vec<EnrichedProjection>>, PipelineError> {
        session.ensure_live()?;
        session.stage = Stage::Error;
        session.message = Some(format!("Unable to load projections: {error}"));

        let text = error.to_string();
        let mut previous = Arc::default();
        self.publish(session, |snap| {
            snap.error = Some(text);
            previous = Arc::clone(&snap.projections);
        })?;
        Ok(previous)
    }

    fn publish(
        &self,
        session: &FetchSession,
        apply: impl FnOnce(&mut PipelineSnapshot),
    ) -> Result<(), PipelineError> {
        let mut live = false;
        self.state.send_if_modified(|snap| {
            if session.is_cancelled() {
                return false;
            }
            live = true;

            let now = Utc::now();
            snap.session_id = Some(session.id());
            snap.sport = Some(session.sport().clone());
            snap.stage = session.stage;
            snap.progress = session.progress;
            snap.message = session.message.clone();
            snap.attempt = session.attempt;
            snap.updated_at = Some(now);
            apply(snap);

            // No subscribers is fine; the watch state is authoritative.
            let _ = self.events.send(StatusUpdate {
                session_id: session.id(),
                sport: session.sport().clone(),
                stage: session.stage,
                progress: session.progress,
                message: session.message.clone(),
                attempt: session.attempt,
                at: now,
            });
            true
        });

        if live {
            Ok(())
        } else {
            Err(PipelineError::Superseded)
        }
    }
}
