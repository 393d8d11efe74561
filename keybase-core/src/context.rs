use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::LogError;

/// Cancellation and deadline handle threaded through every operation
///
/// A context that has already fired fails the operation before it touches
/// the lock or the storage, so the call leaves no effect behind.
///
/// # Example
///
/// ```rust,no_run
/// use keybase_core::{Keybase, OpContext};
/// use std::time::Duration;
///
/// # async fn example(keybase: Keybase) {
/// let ctx = OpContext::with_timeout(Duration::from_millis(500));
/// keybase.put(&ctx, "default", "key0").await.unwrap();
///
/// let (ctx, handle) = OpContext::cancellable();
/// handle.cancel();
/// assert!(keybase.put(&ctx, "default", "key0").await.is_err());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Option<watch::Receiver<bool>>,
}

/// Fires the [`OpContext`] it was created with
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl OpContext {
    /// A context that never fires
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_after(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: None,
        }
    }

    /// A context fired explicitly through the returned handle
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            deadline: None,
            cancelled: Some(rx),
        };
        (ctx, CancelHandle { tx })
    }

    /// Adds (or tightens) a deadline on an existing context
    pub fn deadline_after(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the context has already fired
    pub fn check(&self) -> Result<(), LogError> {
        if let Some(rx) = &self.cancelled {
            if *rx.borrow() {
                return Err(LogError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(LogError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drives `fut` until it completes or the context fires
    ///
    /// When the context fires first `fut` is dropped, releasing anything it
    /// acquired.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, LogError>
    where
        F: Future<Output = Result<T, LogError>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        let cancelled = async {
            match &self.cancelled {
                Some(rx) => {
                    let mut rx = rx.clone();
                    loop {
                        let fired = *rx.borrow_and_update();
                        if fired {
                            break;
                        }
                        if rx.changed().await.is_err() {
                            // Handle dropped without cancelling
                            pending::<()>().await;
                        }
                    }
                }
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(LogError::Cancelled),
            _ = deadline => Err(LogError::DeadlineExceeded),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_fires() {
        let ctx = OpContext::background();
        assert!(ctx.check().is_ok());

        let out = ctx.run(async { Ok::<_, LogError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_before_running() {
        let ctx = OpContext::with_timeout(Duration::ZERO);
        let mut ran = false;

        let out = ctx
            .run(async {
                ran = true;
                Ok::<_, LogError>(())
            })
            .await;

        assert!(matches!(out, Err(LogError::DeadlineExceeded)));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let (ctx, handle) = OpContext::cancellable();
        handle.cancel();

        assert!(matches!(ctx.check(), Err(LogError::Cancelled)));
        let out = ctx.run(async { Ok::<_, LogError>(()) }).await;
        assert!(matches!(out, Err(LogError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let (ctx, handle) = OpContext::cancellable();

        let task = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, LogError>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let out = task.await.expect("task panicked");
        assert!(matches!(out, Err(LogError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_during_run() {
        let ctx = OpContext::with_timeout(Duration::from_millis(20));

        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, LogError>(())
            })
            .await;

        assert!(matches!(out, Err(LogError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = OpContext::cancellable();
        drop(handle);

        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, LogError>("done")
            })
            .await;
        assert_eq!(out.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_deadline_after_keeps_earliest() {
        let ctx = OpContext::with_timeout(Duration::from_millis(10));
        let first = ctx.deadline().unwrap();

        let ctx = ctx.deadline_after(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(first));
    }
}
