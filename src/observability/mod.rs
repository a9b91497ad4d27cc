// Observability: metrics for each pipeline phase. Logging lives in crate::logging.

pub mod metrics;

pub use metrics::{init, render};
