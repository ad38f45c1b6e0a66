//! Paginated batch fetch.
//!
//! Pages through the projection source at a fixed page size until a short
//! page, an empty page, a failed request, or the offset ceiling. A failed
//! page ends the loop but keeps what was already accumulated.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::CallGuard;
use crate::services::{BatchQuery, ProjectionSource};
use crate::types::{PipelineError, Projection, Sport};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page came back shorter than the page size.
    ShortPage,
    EmptyPage,
    /// A page request failed; earlier pages are kept.
    Failed,
    /// The next offset would reach the ceiling.
    Ceiling,
}

/// Position reported before each page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub offset: usize,
    pub ceiling: usize,
    pub accumulated: usize,
}

impl PageProgress {
    /// Fraction of the ceiling already covered, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.ceiling == 0 {
            return 1.0;
        }
        (self.offset as f64 / self.ceiling as f64).min(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Collected {
    pub projections: Vec<Projection>,
    pub fetches: usize,
    pub stop: StopReason,
    pub duplicates: usize,
}

pub struct Paginator {
    source: Arc<dyn ProjectionSource>,
    guard: CallGuard,
    page_size: usize,
    ceiling: usize,
}

impl Paginator {
    pub fn new(
        source: Arc<dyn ProjectionSource>,
        guard: CallGuard,
        page_size: usize,
        ceiling: usize,
    ) -> Self {
        Self {
            source,
            guard,
            page_size: page_size.max(1),
            ceiling,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Fetch every page for `sport` / `prop_type` / `stat_types`.
    ///
    /// `on_page` runs before each request; returning an error aborts the
    /// loop with that error. The only errors this returns are `Superseded`
    /// and whatever `on_page` returns.
    pub async fn collect<F>(
        &self,
        sport: &Sport,
        prop_type: &str,
        stat_types: &[String],
        token: &CancellationToken,
        mut on_page: F,
    ) -> Result<Collected, PipelineError>
    where
        F: FnMut(PageProgress) -> Result<(), PipelineError> + Send,
    {
        let mut projections: Vec<Projection> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = 0;
        let mut fetches = 0;
        let mut offset = 0;

        let stop = loop {
            if offset >= self.ceiling {
                break StopReason::Ceiling;
            }
            if token.is_cancelled() {
                return Err(PipelineError::Superseded);
            }
            on_page(PageProgress {
                offset,
                ceiling: self.ceiling,
                accumulated: projections.len(),
            })?;

            let query = BatchQuery {
                sport: sport.clone(),
                prop_type: prop_type.to_string(),
                stat_types: stat_types.to_vec(),
                limit: self.page_size,
                offset,
            };
            fetches += 1;
            let result = self.guard.call(self.source.fetch_batch(&query)).await;

            // In-flight results of a stale session are discarded.
            if token.is_cancelled() {
                return Err(PipelineError::Superseded);
            }

            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        sport = %sport,
                        offset,
                        accumulated = projections.len(),
                        error = %e,
                        "Batch fetch failed; keeping partial results"
                    );
                    break StopReason::Failed;
                }
            };

            let received = batch.len();
            debug!(sport = %sport, offset, received, "Fetched projection batch");
            for projection in batch {
                if seen.insert(projection.id.clone()) {
                    projections.push(projection);
                } else {
                    duplicates += 1;
                }
            }

            if received == 0 {
                break StopReason::EmptyPage;
            }
            if received < self.page_size {
                break StopReason::ShortPage;
            }
            offset += self.page_size;
        };

        info!(
            sport = %sport,
            fetches,
            total = projections.len(),
            duplicates,
            stop = ?stop,
            "Pagination finished"
        );

        Ok(Collected {
            projections,
            fetches,
            stop,
            duplicates,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
