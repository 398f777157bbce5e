// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::raise_error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// How a run of an [`Interruptible`] operation ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome<T> {
    Completed(T),
    /// Stopped at a suspension point after [`Interruptible::interrupt`].
    Interrupted,
}

impl<T> RunOutcome<T> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted)
    }
}

struct Shared {
    interrupted: AtomicBool,
    forced: watch::Sender<bool>,
    running: watch::Sender<bool>,
}

/// Runs step-wise operations that another task can stop between steps.
///
/// Suspension points are the futures an operation passes through
/// [`InterruptToken::step`]. Sub-operations that receive the same token stop
/// together with their parent.
#[derive(Clone)]
pub struct Interruptible {
    shared: Arc<Shared>,
}

/// Handed to the running operation, checked at every suspension point.
#[derive(Clone)]
pub struct InterruptToken {
    shared: Arc<Shared>,
}

struct RunningGuard<'a>(&'a watch::Sender<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl Default for Interruptible {
    fn default() -> Self {
        Self::new()
    }
}

impl Interruptible {
    pub fn new() -> Self {
        let (forced, _) = watch::channel(false);
        let (running, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                interrupted: AtomicBool::new(false),
                forced,
                running,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Executes `operation` until it finishes or stops at a suspension point.
    ///
    /// Errors raised by the operation are returned as-is. A cooperative stop
    /// yields [`RunOutcome::Interrupted`]; a forced one an error with
    /// [`ErrorCode::Retryable`].
    pub async fn run<T, F, Fut>(&self, operation: F) -> MailSyncResult<RunOutcome<T>>
    where
        F: FnOnce(InterruptToken) -> Fut,
        Fut: Future<Output = MailSyncResult<T>>,
    {
        self.shared.interrupted.store(false, Ordering::SeqCst);
        self.shared.forced.send_replace(false);
        self.shared.running.send_replace(true);
        let _guard = RunningGuard(&self.shared.running);

        let mut forced = self.shared.forced.subscribe();
        let token = InterruptToken {
            shared: self.shared.clone(),
        };

        let result = tokio::select! {
            biased;
            _ = forced.wait_for(|forced| *forced) => Err(raise_error!(
                "Forcefully interrupted".into(),
                ErrorCode::Retryable
            )),
            result = operation(token) => result,
        };

        match result {
            Ok(value) => Ok(RunOutcome::Completed(value)),
            Err(e) if e.is_interrupted() => Ok(RunOutcome::Interrupted),
            Err(e) => Err(e),
        }
    }

    /// Asks the current run to stop and waits until it has.
    ///
    /// With `force_reject` the run is abandoned at once instead of at its next
    /// suspension point. Returns immediately when nothing is running, and such
    /// an interrupt is not latched: [`Interruptible::run`] clears the flag, so
    /// callers that must not start another run stop scheduling it first.
    pub async fn interrupt(&self, force_reject: bool) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        if !self.is_running() {
            return;
        }
        if force_reject {
            self.shared.forced.send_replace(true);
        }
        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }
}

impl InterruptToken {
    /// A token whose run has already been asked to stop.
    #[cfg(test)]
    pub(crate) fn interrupted() -> Self {
        let runner = Interruptible::new();
        runner.shared.interrupted.store(true, Ordering::SeqCst);
        Self {
            shared: runner.shared,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> MailSyncResult<()> {
        if self.is_interrupted() {
            return Err(raise_error!(
                "Interrupted at suspension point".into(),
                ErrorCode::Interrupted
            ));
        }
        Ok(())
    }

    /// Awaits one suspension point. The flag is checked before the work
    /// starts and again before the caller resumes.
    pub async fn step<T>(
        &self,
        work: impl Future<Output = MailSyncResult<T>>,
    ) -> MailSyncResult<T> {
        self.check()?;
        let value = work.await?;
        self.check()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn tick(counter: &AtomicUsize) -> MailSyncResult<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nested(token: &InterruptToken, counter: &AtomicUsize) -> MailSyncResult<()> {
        for _ in 0..5 {
            token.step(tick(counter)).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let runner = Interruptible::new();
        let outcome = runner
            .run(|token| async move {
                token.step(async { Ok(1) }).await?;
                token.step(async { Ok(41) }).await.map(|v| v + 1)
            })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed(42));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_cooperative_interrupt_stops_nested_steps() {
        let runner = Interruptible::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn({
            let runner = runner.clone();
            let counter = counter.clone();
            async move {
                runner
                    .run(|token| async move {
                        for _ in 0..100 {
                            nested(&token, &counter).await?;
                        }
                        Ok(())
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        runner.interrupt(false).await;
        assert!(!runner.is_running());
        let stopped_at = counter.load(Ordering::SeqCst);
        assert!(stopped_at < 500);

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_interrupted());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_forced_interrupt_rejects_with_retryable() {
        let runner = Interruptible::new();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move {
                runner
                    .run(|_token| async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(())
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), runner.interrupt(true))
            .await
            .unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_step_errors_propagate() {
        let runner = Interruptible::new();
        let err = runner
            .run(|token| async move {
                token
                    .step(async {
                        Err::<(), _>(raise_error!("boom".into(), ErrorCode::ImapCommandFailed))
                    })
                    .await
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImapCommandFailed);
    }

    #[tokio::test]
    async fn test_interrupt_when_idle_returns_and_next_run_starts_clean() {
        let runner = Interruptible::new();
        runner.interrupt(true).await;
        let outcome = runner
            .run(|token| async move { token.step(async { Ok("done") }).await })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed("done"));
    }
}
