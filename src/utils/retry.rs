use std::future::Future;

use tracing::warn;

use super::error::CommonError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Runs `attempt` until it stops failing with [`CommonError::ConcurrentModification`], at most
/// `max_retries` extra times.
///
/// Every other error is returned as is on its first occurrence. Each attempt must be a complete
/// atomicity unit so a retry starts over from freshly read state.
pub async fn with_retries<T, F, Fut>(
    operation: &str,
    max_retries: u32,
    mut attempt: F,
) -> Result<T, CommonError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CommonError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(CommonError::ConcurrentModification) if retries < max_retries => {
                retries += 1;
                warn!(
                    "Conflict while running {}, retrying ({}/{})",
                    operation, retries, max_retries
                );
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = &Cell::new(0);
        let result = with_retries("test", 3, move || async move {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(CommonError::ConcurrentModification)
            } else {
                Ok(calls.get())
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = &Cell::new(0);
        let result: Result<(), _> = with_retries("test", 2, move || async move {
            calls.set(calls.get() + 1);
            Err(CommonError::ConcurrentModification)
        })
        .await;

        assert!(matches!(result, Err(CommonError::ConcurrentModification)));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_logical_errors() {
        let calls = &Cell::new(0);
        let result: Result<(), _> = with_retries("test", 5, move || async move {
            calls.set(calls.get() + 1);
            Err(CommonError::TournamentFull(1))
        })
        .await;

        assert!(matches!(result, Err(CommonError::TournamentFull(1))));
        assert_eq!(calls.get(), 1);
    }
}
