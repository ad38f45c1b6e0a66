//! Acquisition engine: sessions, stages and the orchestrator that runs them.

pub mod enricher;
pub mod game_filter;
pub mod lifecycle;
pub mod orchestrator;
pub mod paginator;
pub mod session;
pub mod status;

pub use enricher::{BoundedEnricher, EnrichmentOutcome};
pub use lifecycle::{SportLifecycle, SportRecord};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use paginator::{Collected, PageProgress, Paginator, StopReason};
pub use session::{FetchSession, RunRequest};
pub use status::{PipelineSnapshot, StatusPublisher, StatusUpdate};
