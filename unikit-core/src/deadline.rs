use crate::error::{Result, UnikitError};
use std::future::Future;
use std::time::Duration;

/// Runs `future`, failing with `Timeout` if a deadline is given and passes first.
pub async fn with_deadline<F, T>(operation: &str, deadline: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, future).await {
            Ok(result) => result,
            Err(_) => Err(UnikitError::Timeout {
                operation: operation.to_string(),
                after,
            }),
        },
        None => future.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_deadline_passes_through_results() {
        let value = with_deadline("quick", Some(Duration::from_secs(5)), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let err = with_deadline("slow", Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
