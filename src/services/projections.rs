//! Projection source: paged odds-comparison records.
//!
//! `GET /mlb/odds-comparison/?market_type=&sport=&limit=&offset=&stat_types=`
//!
//! Returns either a bare array or `{"data": [...]}` / `{"props": [...]}`.
//! Records are normalised into `Projection`s here; records the pipeline
//! cannot identify are dropped with a debug log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::client::{unwrap_list, BackendClient};
use super::{BatchQuery, ProjectionSource};
use crate::types::Projection;

const ODDS_PATH: &str = "/mlb/odds-comparison/";
const LIST_KEYS: &[&str] = &["data", "props", "projections"];

/// HTTP `ProjectionSource` against the analytics backend.
pub struct HttpProjectionSource {
    backend: BackendClient,
}

impl HttpProjectionSource {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    fn path_for(query: &BatchQuery) -> String {
        let mut path = format!(
            "{ODDS_PATH}?market_type={}&sport={}&limit={}&offset={}",
            urlencoding::encode(&query.prop_type),
            urlencoding::encode(query.sport.id()),
            query.limit,
            query.offset,
        );
        if !query.stat_types.is_empty() {
            path.push_str("&stat_types=");
            path.push_str(&urlencoding::encode(&query.stat_types.join(",")));
        }
        path
    }

    fn normalise(body: Value) -> Result<Vec<Projection>> {
        let records = unwrap_list(body, LIST_KEYS)?;
        let total = records.len();
        let projections: Vec<Projection> = records.iter().filter_map(Projection::from_raw).collect();
        if projections.len() < total {
            debug!(
                dropped = total - projections.len(),
                total,
                "Dropped projection records without a player"
            );
        }
        Ok(projections)
    }
}

#[async_trait]
impl ProjectionSource for HttpProjectionSource {
    async fn fetch_batch(&self, query: &BatchQuery) -> Result<Vec<Projection>> {
        let body: Value = self
            .backend
            .get_json(&Self::path_for(query))
            .await
            .with_context(|| {
                format!("Projection batch failed for {} at offset {}", query.sport, query.offset)
            })?;
        Self::normalise(body)
    }
}
