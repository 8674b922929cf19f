use crate::error::{BillingError, Result};
use std::time::Duration;
use tokio::time::timeout;

/// Await `future` for at most `limit`; elapsing maps to [`BillingError::Timeout`].
pub async fn run_with_timeout<F, T>(limit: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout(limit, future).await {
        Ok(res) => res,
        Err(_) => Err(BillingError::Timeout(limit)),
    }
}
