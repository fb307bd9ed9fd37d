use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SsoError};

/// Run `fut` with a deadline; elapsing yields `SsoError::Timeout(operation)`.
pub async fn with_timeout<T, F>(duration: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = duration.as_millis() as u64, "operation timed out");
            Err(SsoError::Timeout(operation.to_string()))
        }
    }
}
