use std::future::Future;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Run an external lookup with an upper time bound.
///
/// An elapsed deadline surfaces as `PipelineError::Timeout` so callers can
/// degrade it the same way as any other store error.
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            operation: operation.to_string(),
            millis: limit.as_millis() as u64,
        }),
    }
}
