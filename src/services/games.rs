//! Upcoming-games provider.
//!
//! `GET /mlb/todays-games?sport=` returns a bare array or `{"games": [...]}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::client::{unwrap_list, BackendClient};
use super::UpcomingGamesProvider;
use crate::types::{Game, Sport};

const GAMES_PATH: &str = "/mlb/todays-games";
const LIST_KEYS: &[&str] = &["games", "data"];

/// HTTP `UpcomingGamesProvider` against the analytics backend.
pub struct HttpGamesProvider {
    backend: BackendClient,
}

impl HttpGamesProvider {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    fn parse(body: Value) -> Result<Vec<Game>> {
        let games = unwrap_list(body, LIST_KEYS)?
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Game>(raw) {
                Ok(game) => Some(game),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed game record");
                    None
                }
            })
            .collect();
        Ok(games)
    }
}

#[async_trait]
impl UpcomingGamesProvider for HttpGamesProvider {
    async fn upcoming_games(&self, sport: &Sport) -> Result<Vec<Game>> {
        let path = format!("{GAMES_PATH}?sport={}", urlencoding::encode(sport.id()));
        let body: Value = self
            .backend
            .get_json(&path)
            .await
            .with_context(|| format!("Failed to fetch upcoming games for {sport}"))?;
        Self::parse(body)
    }
}
