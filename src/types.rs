//! Shared types for the PROPLINE pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that service, engine, and
//! dashboard modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Sport
// ---------------------------------------------------------------------------

/// A league/competition identifier such as `MLB` or `NBA`.
///
/// Identifiers are normalised to trimmed upper case, so `"mlb"` and
/// `" MLB "` name the same sport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Sport(String);

impl Sport {
    /// Sentinel meaning "every sport"; never activated or deactivated.
    pub const ALL_SENTINEL: &'static str = "ALL";

    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_uppercase())
    }

    pub fn all() -> Self {
        Self(Self::ALL_SENTINEL.to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL_SENTINEL
    }
}

impl From<String> for Sport {
    fn from(value: String) -> Self {
        Sport::new(value)
    }
}

impl From<&str> for Sport {
    fn from(value: &str) -> Self {
        Sport::new(value)
    }
}

impl From<Sport> for String {
    fn from(value: Sport) -> Self {
        value.0
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Activation state of a sport's remote compute resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SportStatus {
    #[default]
    Inactive,
    Loading,
    Ready,
    Error,
}

impl fmt::Display for SportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SportStatus::Inactive => write!(f, "inactive"),
            SportStatus::Loading => write!(f, "loading"),
            SportStatus::Ready => write!(f, "ready"),
            SportStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of asking the backend to load a sport's models and caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub ready: bool,
    pub newly_loaded: bool,
    pub load_time_seconds: Option<f64>,
}

/// Result of asking the backend to release a sport's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationReport {
    pub ok: bool,
}

// ---------------------------------------------------------------------------
// Stat filter
// ---------------------------------------------------------------------------

/// Server-side stat-type constraint applied to every projection page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StatFilter {
    /// No constraint; the source returns every stat type.
    #[default]
    Any,
    /// A named preset resolved through the configured preset table.
    Preset(String),
    /// An explicit list of stat types.
    Types(Vec<String>),
}

impl StatFilter {
    /// Resolve to the concrete list of stat types sent with each page request.
    /// An empty list means no server-side filtering.
    pub fn resolve(
        &self,
        presets: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, PipelineError> {
        match self {
            StatFilter::Any => Ok(Vec::new()),
            StatFilter::Types(types) => Ok(types.clone()),
            StatFilter::Preset(name) => presets
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, types)| types.clone())
                .ok_or_else(|| PipelineError::UnknownStatPreset(name.clone())),
        }
    }
}

impl fmt::Display for StatFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatFilter::Any => write!(f, "any"),
            StatFilter::Preset(name) => write!(f, "preset:{}", name.to_lowercase()),
            StatFilter::Types(types) => write!(f, "types:{}", types.join(",")),
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// A normalised projection ("featured prop") as exposed to the consumer.
///
/// Numeric fields the source omitted or sent malformed stay `None`; the
/// consumer decides what to display for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub id: String,
    pub player: String,
    pub stat_type: Option<String>,
    pub line: Option<Decimal>,
    pub confidence: Option<f64>,
    pub matchup: Option<String>,
    /// The record exactly as the projection source sent it.
    #[serde(default)]
    pub raw: Value,
}

const ID_KEYS: &[&str] = &["id", "prop_id", "projection_id"];
const PLAYER_KEYS: &[&str] = &["player_name", "player", "playerName"];
const STAT_KEYS: &[&str] = &["stat_type", "statType", "prop_type", "market"];
const LINE_KEYS: &[&str] = &["line", "line_score", "lineScore"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "confidence_score"];
const MATCHUP_KEYS: &[&str] = &["matchup", "event_name", "eventName", "game"];

impl Projection {
    /// Normalise one raw source record.
    ///
    /// Returns `None` for records without a player, which cannot be shown
    /// or deduplicated. When the record carries no identifier one is
    /// composed from player, stat type and line.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let player = first_string(raw, PLAYER_KEYS)?;
        let stat_type = first_string(raw, STAT_KEYS);
        let line = first_field(raw, LINE_KEYS).and_then(parse_decimal);
        let confidence = first_field(raw, CONFIDENCE_KEYS).and_then(parse_f64);
        let matchup = first_string(raw, MATCHUP_KEYS);

        let id = first_field(raw, ID_KEYS)
            .and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| {
                format!(
                    "{}:{}:{}",
                    player,
                    stat_type.as_deref().unwrap_or("unknown"),
                    line.map(|l| l.normalize().to_string()).unwrap_or_default(),
                )
            });

        Some(Self {
            id,
            player,
            stat_type,
            line,
            confidence,
            matchup,
            raw: raw.clone(),
        })
    }
}

fn first_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn parse_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_f64(v: &Value) -> Option<f64> {
    let value = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// Model output attached to a projection by the enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Prediction {
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub predicted_value: Option<f64>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub expected_value: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// A projection with an optional prediction. `prediction` is `None` when
/// enrichment was unavailable for this item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedProjection {
    #[serde(flatten)]
    pub projection: Projection,
    pub prediction: Option<Prediction>,
}

impl EnrichedProjection {
    pub fn unenriched(projection: Projection) -> Self {
        Self {
            projection,
            prediction: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.projection.id
    }

    pub fn is_enriched(&self) -> bool {
        self.prediction.is_some()
    }
}

// ---------------------------------------------------------------------------
// Upcoming games
// ---------------------------------------------------------------------------

/// A scheduled game from the upcoming-games provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Game {
    /// Combined label, usually `"Away @ Home"`.
    #[serde(default, alias = "eventName", alias = "name")]
    pub event_name: String,
    #[serde(default, alias = "home_team", alias = "homeTeam")]
    pub home: Option<String>,
    #[serde(default, alias = "away_team", alias = "awayTeam")]
    pub away: Option<String>,
    #[serde(
        default,
        alias = "start_time",
        alias = "game_time",
        deserialize_with = "lenient_time"
    )]
    pub time: Option<DateTime<Utc>>,
}

/// Accept RFC 3339 timestamps; anything else becomes `None` rather than
/// failing the whole game list.
fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Stage of an acquisition run as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// No run has started yet.
    #[default]
    Idle,
    Initializing,
    ActivatingSport,
    FetchingBatches,
    Filtering,
    Enriching,
    Retrying,
    Complete,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "idle",
            Stage::Initializing => "initializing",
            Stage::ActivatingSport => "activating-sport",
            Stage::FetchingBatches => "fetching-batches",
            Stage::Filtering => "filtering",
            Stage::Enriching => "enriching",
            Stage::Retrying => "retrying",
            Stage::Complete => "complete",
            Stage::Error => "error",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Pipeline-level failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Session superseded by a newer request")]
    Superseded,

    #[error("Unknown stat preset: {0}")]
    UnknownStatPreset(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("{collaborator} call timed out after {secs:.1}s")]
    Timeout { collaborator: String, secs: f64 },

    #[error("Failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
