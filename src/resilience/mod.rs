//! Resilience primitives for collaborator calls.
//!
//! - `backoff`: whole-run retry delays with cancellable sleeps
//! - `circuit_breaker`: per-collaborator Closed/Open/Half-Open breaker
//! - `guard`: breaker + per-call timeout wrapper used at every call site

pub mod backoff;
pub mod circuit_breaker;
pub mod guard;

pub use backoff::{sleep_unless_cancelled, Backoff};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use guard::CallGuard;
