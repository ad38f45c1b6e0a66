//! One acquisition run and the request that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::{PipelineError, Sport, Stage, StatFilter};

/// The triggering (sport, prop type, stat filter) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunRequest {
    pub sport: Sport,
    pub prop_type: String,
    #[serde(default)]
    pub stat_filter: StatFilter,
}

impl RunRequest {
    pub fn new(sport: impl Into<Sport>, prop_type: impl Into<String>, stat_filter: StatFilter) -> Self {
        Self {
            sport: sport.into(),
            prop_type: prop_type.into(),
            stat_filter,
        }
    }
}

/// State of a single orchestration run.
///
/// Owned by the orchestrator for the duration of the run. Once its token
/// is cancelled the session is stale and must not publish anything.
#[derive(Debug)]
pub struct FetchSession {
    id: Uuid,
    request: RunRequest,
    token: CancellationToken,
    started_at: DateTime<Utc>,
    pub(crate) attempt: u32,
    pub(crate) stage: Stage,
    pub(crate) progress: u8,
    pub(crate) message: Option<String>,
}

impl FetchSession {
    pub(crate) fn new(request: RunRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            token: CancellationToken::new(),
            started_at: Utc::now(),
            attempt: 0,
            stage: Stage::Idle,
            progress: 0,
            message: None,
        }
    }

    /// Count `attempts` as already spent, leaving at least one of `max`.
    pub(crate) fn with_attempts_spent(mut self, attempts: u32, max: u32) -> Self {
        self.attempt = attempts.min(max.max(1) - 1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    pub fn sport(&self) -> &Sport {
        &self.request.sport
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Superseded)
        } else {
            Ok(())
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
