//! PROPLINE: sport-aware projection acquisition pipeline
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod services;
pub mod resilience;
pub mod engine;
pub mod dashboard;
