//! Deadline enforcement

use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;

/// Run `fut` with a hard limit; expiry becomes a retryable `Timeout` error.
///
/// # Errors
/// Returns [`ServiceError::timeout`] on expiry, otherwise the future's own
/// error
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn expiry_maps_to_timeout_kind() {
        let err = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_future_passes_through() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<_, ServiceError>(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }
}
