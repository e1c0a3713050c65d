//! Requeue Supervisor
//!
//! Drives the outer election loop for one path: register, run the
//! candidacy, hand a won election to the tenure, resign afterwards, and
//! (with auto-requeue) immediately rejoin the candidate pool. [`enter`]
//! spawns the supervisor and hands back the [`ElectionHandle`] consumers
//! interact with.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::CoordinationClient;
use crate::config::ElectionConfig;
use crate::election::coordinator::{CandidacyOutcome, ElectionCoordinator};
use crate::election::tenure::{ElectionListener, LeaderWorkload, LeadershipTenure};
use crate::error::{Error, Result};
use crate::role::{ElectionStatus, Role, RoleReporter};
use crate::state::{LeadershipState, TenureEnd};

/// Mutable diagnostics shared between the supervisor and the handle
#[derive(Default)]
struct Diagnostics {
    candidate_id: Option<String>,
    candidate_ordinal: Option<u64>,
    tenure_started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

impl Diagnostics {
    fn record_error(&mut self, err: &dyn std::fmt::Display) {
        self.last_error = Some(err.to_string());
        self.last_error_at = Some(Utc::now());
    }
}

/// Enter an election.
///
/// Spawns the supervisor task for `path` and returns immediately; the
/// returned handle observes and controls the election. Fails synchronously
/// only for an invalid path or configuration; transient registration
/// failures are retried inside the supervisor per the backoff policy.
pub fn enter(
    client: Arc<dyn CoordinationClient>,
    path: impl Into<String>,
    workload: Arc<dyn LeaderWorkload>,
    listener: Option<Arc<dyn ElectionListener>>,
    config: ElectionConfig,
) -> Result<ElectionHandle> {
    let path = path.into();
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(Error::Registration {
            path,
            reason: "election path must be absolute and not end in '/'".into(),
        });
    }
    config.validate()?;

    let (state_tx, state_rx) = watch::channel(LeadershipState::Unregistered);
    let cancel = CancellationToken::new();
    let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));

    let supervisor = RequeueSupervisor {
        coordinator: ElectionCoordinator::new(
            Arc::clone(&client),
            path.clone(),
            config.election.watch_strategy,
            config.backoff.clone(),
            state_tx,
        ),
        tenure: LeadershipTenure::new(
            path.clone(),
            workload,
            listener,
            config.election.grace_period(),
        ),
        client,
        config,
        diagnostics: Arc::clone(&diagnostics),
        cancel: cancel.clone(),
    };

    let task = tokio::spawn(supervisor.run());

    Ok(ElectionHandle {
        path,
        reporter: RoleReporter::new(state_rx),
        cancel,
        task: Mutex::new(Some(task)),
        diagnostics,
    })
}

/// The outer election loop for one path
struct RequeueSupervisor {
    coordinator: ElectionCoordinator,
    tenure: LeadershipTenure,
    client: Arc<dyn CoordinationClient>,
    config: ElectionConfig,
    diagnostics: Arc<Mutex<Diagnostics>>,
    cancel: CancellationToken,
}

impl RequeueSupervisor {
    async fn run(mut self) {
        let path = self.coordinator.path().to_string();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.register().await {
                break;
            }

            let requeue = self.cycle().await;
            self.clear_candidate();

            if !requeue || self.cancel.is_cancelled() {
                break;
            }
            tracing::debug!("election {path}: re-entering candidate pool");
        }
        tracing::info!("election {path}: supervisor finished");
    }

    /// Register, retrying per the backoff policy. With auto-requeue an
    /// exhausted schedule starts over instead of giving up, so perpetual
    /// candidacy survives long coordination-service outages. Returns false
    /// once the supervisor should end.
    async fn register(&mut self) -> bool {
        let mut attempt = 0u32;
        loop {
            match self.coordinator.register().await {
                Ok(()) => {
                    let mut diag = self.diagnostics.lock().unwrap();
                    let candidate = self.coordinator.candidate();
                    diag.candidate_id = candidate.map(|c| c.id.clone());
                    diag.candidate_ordinal = candidate.map(|c| c.ordinal);
                    return true;
                }
                Err(e) => {
                    self.diagnostics.lock().unwrap().record_error(&e);
                    let delay = match self.config.backoff.delay(attempt) {
                        Some(delay) => delay,
                        None if self.config.election.auto_requeue => {
                            // Fresh schedule, keep trying
                            attempt = 0;
                            self.config
                                .backoff
                                .delay(0)
                                .unwrap_or(std::time::Duration::from_secs(1))
                        }
                        None => {
                            tracing::error!(
                                "election {}: registration abandoned: {e}",
                                self.coordinator.path()
                            );
                            return false;
                        }
                    };
                    attempt += 1;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One registered cycle: candidacy, possibly a tenure, then resign.
    /// Returns whether the supervisor should requeue.
    async fn cycle(&mut self) -> bool {
        match self.coordinator.run_candidacy(&self.cancel).await {
            CandidacyOutcome::Won => {
                {
                    let mut diag = self.diagnostics.lock().unwrap();
                    diag.tenure_started_at = Some(Utc::now());
                }

                let report = self.tenure.run(self.client.session(), &self.cancel).await;

                {
                    let mut diag = self.diagnostics.lock().unwrap();
                    diag.tenure_started_at = None;
                    if let Some(e) = &report.workload_error {
                        diag.record_error(&Error::Workload(anyhow::anyhow!("{e:#}")));
                    }
                }

                let via = match report.end {
                    TenureEnd::Relinquished => LeadershipState::Relinquishing,
                    TenureEnd::Lost => LeadershipState::Lost,
                };
                self.coordinator.resign(via).await;
                self.config.election.auto_requeue
            }
            CandidacyOutcome::SessionLost => {
                self.diagnostics.lock().unwrap().record_error(&Error::SessionExpired);
                self.coordinator.resign(LeadershipState::Lost).await;
                self.config.election.auto_requeue
            }
            CandidacyOutcome::Stopped => {
                self.coordinator.resign(LeadershipState::Relinquishing).await;
                false
            }
        }
    }

    fn clear_candidate(&self) {
        let mut diag = self.diagnostics.lock().unwrap();
        diag.candidate_id = None;
        diag.candidate_ordinal = None;
    }
}

/// Observe-and-control handle for one entered election.
///
/// Reads are non-blocking and never mutate election state. Dropping the
/// handle leaves the election running; [`ElectionHandle::stop`] is the
/// explicit teardown.
pub struct ElectionHandle {
    path: String,
    reporter: RoleReporter,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    diagnostics: Arc<Mutex<Diagnostics>>,
}

impl ElectionHandle {
    /// Election path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this process currently leads (non-blocking)
    pub fn is_leader(&self) -> bool {
        self.reporter.is_leader()
    }

    /// Current leadership state (non-blocking)
    pub fn state(&self) -> LeadershipState {
        self.reporter.state()
    }

    /// Current role (non-blocking)
    pub fn role(&self) -> Role {
        self.reporter.role()
    }

    /// A cloneable read-only reporter for external consumers
    pub fn reporter(&self) -> RoleReporter {
        self.reporter.clone()
    }

    /// Diagnostics snapshot
    pub fn status(&self) -> ElectionStatus {
        let diag = self.diagnostics.lock().unwrap();
        let state = self.reporter.state();
        ElectionStatus {
            path: self.path.clone(),
            state,
            role: state.into(),
            candidate_id: diag.candidate_id.clone(),
            candidate_ordinal: diag.candidate_ordinal,
            tenure_started_at: diag.tenure_started_at,
            last_error: diag.last_error.clone(),
            last_error_at: diag.last_error_at,
        }
    }

    /// Stop the election: relinquish if leading, delete the candidate
    /// node, suppress requeue, and wait for the supervisor to finish.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("election {}: supervisor task failed: {e}", self.path);
            }
        }
    }
}
