//! Leadership Tenure
//!
//! One continuous period of held leadership. The tenure runs the
//! user-supplied workload exactly once, on its own task, and supervises
//! it against the two things that end a tenure: an explicit relinquish
//! request and coordination-session expiry.
//!
//! Notifications are strict: exactly one acquired and exactly one
//! relinquished per tenure, in that order, the latter emitted even on
//! forced loss so leader-only resources always get released.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::SessionState;
use crate::state::TenureEnd;

/// The work a process performs while it leads.
///
/// `lead` is invoked once per tenure with a cancellation token; the
/// workload must observe the token cooperatively at safe points. Returning
/// (with or without error) ends the tenure voluntarily.
#[async_trait]
pub trait LeaderWorkload: Send + Sync + 'static {
    async fn lead(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Adapt an async closure into a [`LeaderWorkload`]
pub fn workload_fn<F, Fut>(f: F) -> Arc<dyn LeaderWorkload>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnWorkload {
        f: Box::new(move |cancel| f(cancel).boxed()),
    })
}

type WorkloadFn = Box<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct FnWorkload {
    f: WorkloadFn,
}

#[async_trait]
impl LeaderWorkload for FnWorkload {
    async fn lead(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        (self.f)(cancel).await
    }
}

/// Lifecycle notifications for one election, registered at construction.
///
/// Both methods default to no-ops; implement whichever matters.
pub trait ElectionListener: Send + Sync + 'static {
    /// Fired exactly once when a tenure begins
    fn on_leadership_acquired(&self, _path: &str) {}

    /// Fired exactly once when a tenure ends, after the acquired
    /// notification, even when the loss was forced
    fn on_leadership_relinquished(&self, _path: &str, _end: TenureEnd) {}
}

/// Outcome of one tenure
pub struct TenureReport {
    /// How the tenure ended
    pub end: TenureEnd,
    /// Error returned by the workload, if any
    pub workload_error: Option<anyhow::Error>,
    /// When the tenure began
    pub started_at: DateTime<Utc>,
}

/// Supervises one leadership tenure
pub struct LeadershipTenure {
    path: String,
    workload: Arc<dyn LeaderWorkload>,
    listener: Option<Arc<dyn ElectionListener>>,
    grace: Duration,
}

impl LeadershipTenure {
    pub fn new(
        path: impl Into<String>,
        workload: Arc<dyn LeaderWorkload>,
        listener: Option<Arc<dyn ElectionListener>>,
        grace: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            workload,
            listener,
            grace,
        }
    }

    /// Run the tenure to completion. Entered only from LEADER.
    pub async fn run(
        &self,
        mut session: watch::Receiver<SessionState>,
        cancel: &CancellationToken,
    ) -> TenureReport {
        let started_at = Utc::now();
        tracing::info!("election {}: leadership acquired", self.path);
        if let Some(listener) = &self.listener {
            listener.on_leadership_acquired(&self.path);
        }

        // The workload gets a child token so the tenure can cancel it
        // without consuming the caller's stop signal.
        let child = cancel.child_token();
        let workload = Arc::clone(&self.workload);
        let token = child.clone();
        let mut task = tokio::spawn(async move { workload.lead(token).await });

        let mut end = TenureEnd::Relinquished;
        let mut workload_error = None;

        loop {
            tokio::select! {
                joined = &mut task => {
                    match joined {
                        Ok(Ok(())) => {
                            tracing::info!("election {}: workload completed", self.path);
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("election {}: workload failed: {e:#}", self.path);
                            workload_error = Some(e);
                        }
                        Err(e) => {
                            tracing::error!("election {}: workload panicked: {e}", self.path);
                            workload_error = Some(anyhow::anyhow!("workload panicked: {e}"));
                        }
                    }
                    break;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("election {}: relinquish requested", self.path);
                    end = self.wind_down(&mut task, TenureEnd::Relinquished, &mut workload_error).await;
                    break;
                }
                changed = session.changed() => {
                    let expired = changed.is_err()
                        || *session.borrow_and_update() == SessionState::Expired;
                    if expired {
                        tracing::warn!("election {}: session expired while leading", self.path);
                        child.cancel();
                        end = self.wind_down(&mut task, TenureEnd::Lost, &mut workload_error).await;
                        break;
                    }
                    if *session.borrow() == SessionState::Suspended {
                        tracing::warn!("election {}: session suspended while leading", self.path);
                    }
                }
            }
        }

        tracing::info!("election {}: leadership relinquished ({})", self.path, end);
        if let Some(listener) = &self.listener {
            listener.on_leadership_relinquished(&self.path, end);
        }

        TenureReport {
            end,
            workload_error,
            started_at,
        }
    }

    /// Wait out the grace period for a canceled workload. A workload that
    /// overruns it is aborted and the tenure is marked LOST: the service
    /// may already believe this process has failed.
    async fn wind_down(
        &self,
        task: &mut tokio::task::JoinHandle<anyhow::Result<()>>,
        intended: TenureEnd,
        workload_error: &mut Option<anyhow::Error>,
    ) -> TenureEnd {
        match tokio::time::timeout(self.grace, &mut *task).await {
            Ok(Ok(Ok(()))) => intended,
            Ok(Ok(Err(e))) => {
                tracing::warn!("election {}: workload failed during shutdown: {e:#}", self.path);
                *workload_error = Some(e);
                intended
            }
            Ok(Err(e)) => {
                tracing::error!("election {}: workload panicked during shutdown: {e}", self.path);
                *workload_error = Some(anyhow::anyhow!("workload panicked: {e}"));
                intended
            }
            Err(_) => {
                tracing::error!(
                    "election {}: workload ignored cancellation for {:?}; forcing loss",
                    self.path,
                    self.grace
                );
                task.abort();
                TenureEnd::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        acquired: AtomicUsize,
        relinquished: Mutex<Vec<TenureEnd>>,
    }

    impl ElectionListener for RecordingListener {
        fn on_leadership_acquired(&self, _path: &str) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        fn on_leadership_relinquished(&self, _path: &str, end: TenureEnd) {
            self.relinquished.lock().unwrap().push(end);
        }
    }

    fn session_channel() -> (watch::Sender<SessionState>, watch::Receiver<SessionState>) {
        watch::channel(SessionState::Connected)
    }

    #[tokio::test]
    async fn test_workload_completion_ends_tenure_voluntarily() {
        let listener = Arc::new(RecordingListener::default());
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|_| async { Ok(()) }),
            Some(listener.clone() as Arc<dyn ElectionListener>),
            Duration::from_secs(1),
        );

        let (_tx, rx) = session_channel();
        let report = tenure.run(rx, &CancellationToken::new()).await;

        assert_eq!(report.end, TenureEnd::Relinquished);
        assert!(report.workload_error.is_none());
        assert_eq!(listener.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(*listener.relinquished.lock().unwrap(), vec![TenureEnd::Relinquished]);
    }

    #[tokio::test]
    async fn test_cooperative_relinquish() {
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|cancel: CancellationToken| async move {
                cancel.cancelled().await;
                Ok(())
            }),
            None,
            Duration::from_secs(1),
        );

        let (_tx, rx) = session_channel();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        });

        let report = tenure.run(rx, &cancel).await;
        assert_eq!(report.end, TenureEnd::Relinquished);
    }

    #[tokio::test]
    async fn test_uncooperative_workload_is_forced_lost() {
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|_| async {
                // Ignores the token entirely
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(())
            }),
            None,
            Duration::from_millis(50),
        );

        let (_tx, rx) = session_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = tenure.run(rx, &cancel).await;
        assert_eq!(report.end, TenureEnd::Lost);
    }

    #[tokio::test]
    async fn test_session_expiry_forces_loss() {
        let listener = Arc::new(RecordingListener::default());
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|cancel: CancellationToken| async move {
                cancel.cancelled().await;
                Ok(())
            }),
            Some(listener.clone() as Arc<dyn ElectionListener>),
            Duration::from_secs(1),
        );

        let (tx, rx) = session_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(SessionState::Expired);
        });

        let report = tenure.run(rx, &CancellationToken::new()).await;
        assert_eq!(report.end, TenureEnd::Lost);
        // Relinquished notification still fired, with the forced outcome
        assert_eq!(*listener.relinquished.lock().unwrap(), vec![TenureEnd::Lost]);
    }

    #[tokio::test]
    async fn test_suspended_session_does_not_end_tenure() {
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(())
            }),
            None,
            Duration::from_secs(1),
        );

        // The sender must outlive the run: a dropped session channel is
        // treated as expiry, which is not the scenario under test.
        let (tx, rx) = session_channel();
        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = sender.send(SessionState::Suspended);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = sender.send(SessionState::Connected);
        });

        let report = tenure.run(rx, &CancellationToken::new()).await;
        drop(tx);
        assert_eq!(report.end, TenureEnd::Relinquished);
    }

    #[tokio::test]
    async fn test_workload_error_is_surfaced_not_fatal() {
        let tenure = LeadershipTenure::new(
            "/e",
            workload_fn(|_| async { anyhow::bail!("disk on fire") }),
            None,
            Duration::from_secs(1),
        );

        let (_tx, rx) = session_channel();
        let report = tenure.run(rx, &CancellationToken::new()).await;

        assert_eq!(report.end, TenureEnd::Relinquished);
        let err = report.workload_error.unwrap();
        assert!(err.to_string().contains("disk on fire"));
    }
}
