pub mod common;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;

pub mod envelope;
pub mod fingerprint;
pub mod observability;
pub mod pipeline;

// Application use cases and the ports they depend on
pub mod app;
pub mod infra;
