//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::types::{Sport, StatFilter};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Env var holding the backend API key, if the backend requires one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-call timeout applied to every collaborator request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Resolve the API key from the environment, if configured and set.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .map(SecretString::new)
    }
}

/// Knobs for one acquisition run.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_sport: String,
    pub default_prop_type: String,
    /// Fixed page size for every batch request.
    pub page_size: usize,
    /// No batch is requested at or beyond this offset.
    pub offset_ceiling: usize,
    /// How many projections are sent for enrichment.
    pub enrichment_cap: usize,
    /// Total attempts per run, first attempt included.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Restrict results to teams playing in upcoming games.
    pub filter_upcoming: bool,
    /// Named stat-type presets, e.g. `popular = ["hits", "rbi"]`.
    pub stat_presets: HashMap<String, Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_sport: "MLB".to_string(),
            default_prop_type: "player".to_string(),
            page_size: 500,
            offset_ceiling: 3000,
            enrichment_cap: 200,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 5000,
            filter_upcoming: false,
            stat_presets: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn default_sport(&self) -> Sport {
        Sport::new(&self.default_sport)
    }

    pub fn default_stat_filter(&self) -> StatFilter {
        StatFilter::Any
    }
}

/// Circuit breaker settings shared by every collaborator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub cooldown_secs: u64,
    pub half_open_sample: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            half_open_sample: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_timeout_secs() -> u64 {
    20
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
