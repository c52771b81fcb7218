use std::{future::Future, time::Duration};

use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, ServerError};

/// Caller supplied bounds for one coordinator call. Every per-server call
/// races against the deadline and the cancellation token; losing the race
/// counts as a failure vote for that server.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// No deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => timeout_at(deadline, call)
                    .await
                    .map_err(|_| ServerError::Timeout)?,
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ServerError::Cancelled),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::CallContext;
    use crate::errors::ServerError;

    #[tokio::test]
    async fn background_passes_results_through() {
        let ctx = CallContext::background();
        let value = ctx.run(async { Ok::<_, ServerError>(7) }).await;
        assert_eq!(value.ok(), Some(7));
    }

    #[tokio::test]
    async fn deadline_turns_slow_calls_into_timeouts() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(10));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ServerError>(())
            })
            .await;
        assert!(matches!(result, Err(ServerError::Timeout)));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_call() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());
        token.cancel();
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ServerError>(())
            })
            .await;
        assert!(matches!(result, Err(ServerError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn earlier_deadline_is_kept() {
        let ctx = CallContext::background()
            .with_timeout(Duration::from_millis(50))
            .with_timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().expect("deadline set");
        assert!(deadline <= tokio::time::Instant::now() + Duration::from_millis(50));
    }
}
