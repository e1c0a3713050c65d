//! Election Coordinator
//!
//! Owns the candidacy lifecycle for one election path: register an
//! ephemeral-sequential candidate node, decide leader/follower from the
//! live candidate ordinals, re-evaluate on watch fires, and resign.
//!
//! All re-evaluation for a path runs on one logical task; the coordinator
//! holds its state unshared and publishes transitions through a watch
//! channel that readers borrow without locking.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{CandidateNode, CoordinationClient, SessionState, WatchToken};
use crate::config::{BackoffConfig, WatchStrategy};
use crate::error::{Error, Result};
use crate::state::LeadershipState;

/// How a candidacy run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidacyOutcome {
    /// This node's ordinal is the minimum; state is now LEADER
    Won,
    /// The coordination session expired (or retries were exhausted);
    /// state is now LOST and the candidate node is gone
    SessionLost,
    /// Candidacy was canceled by `stop()`
    Stopped,
}

/// Per-path election state machine
pub struct ElectionCoordinator {
    client: Arc<dyn CoordinationClient>,
    path: String,
    strategy: WatchStrategy,
    backoff: BackoffConfig,
    state_tx: watch::Sender<LeadershipState>,
    /// This process's registration, exclusively owned by the coordinator
    own: Option<CandidateNode>,
}

impl ElectionCoordinator {
    /// Create a coordinator for one election path
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        path: impl Into<String>,
        strategy: WatchStrategy,
        backoff: BackoffConfig,
        state_tx: watch::Sender<LeadershipState>,
    ) -> Self {
        Self {
            client,
            path: path.into(),
            strategy,
            backoff,
            state_tx,
            own: None,
        }
    }

    /// Election path this coordinator serves
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state (non-blocking read)
    pub fn state(&self) -> LeadershipState {
        *self.state_tx.borrow()
    }

    /// This process's candidate node, if registered
    pub fn candidate(&self) -> Option<&CandidateNode> {
        self.own.as_ref()
    }

    fn transition(&self, next: LeadershipState) {
        let prev = self.state();
        if prev != next {
            tracing::info!("election {}: {} -> {}", self.path, prev, next);
            let _ = self.state_tx.send(next);
        }
    }

    /// Enter the candidate pool: UNREGISTERED -> CANDIDATE.
    ///
    /// Creates this process's ephemeral-sequential node. Calling this while
    /// already registered is a programmer error and is rejected with
    /// [`Error::AlreadyRegistered`] without touching any state.
    pub async fn register(&mut self) -> Result<()> {
        let state = self.state();
        if state.is_registered() {
            return Err(Error::AlreadyRegistered {
                path: self.path.clone(),
                state,
            });
        }

        if !self.path.starts_with('/') || self.path.ends_with('/') {
            return Err(Error::Registration {
                path: self.path.clone(),
                reason: "election path must be absolute and not end in '/'".into(),
            });
        }

        let node = self
            .client
            .create_ephemeral_sequential(&self.path)
            .await
            .map_err(|e| Error::Registration {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            "election {}: registered candidate {} (ordinal {})",
            self.path,
            node.id,
            node.ordinal
        );
        self.own = Some(node);
        self.transition(LeadershipState::Candidate);
        Ok(())
    }

    /// Run the candidacy until this node wins, loses its session, or is
    /// canceled. Entered only from CANDIDATE.
    ///
    /// Every pass re-lists the live candidates rather than trusting a watch
    /// payload; watch fires that raced an earlier transition therefore
    /// cannot mislead the evaluation.
    pub async fn run_candidacy(&mut self, cancel: &CancellationToken) -> CandidacyOutcome {
        let mut session = self.client.session();

        loop {
            if cancel.is_cancelled() {
                return CandidacyOutcome::Stopped;
            }
            if *session.borrow_and_update() == SessionState::Expired {
                return self.lost();
            }

            // The child-set watch must exist before the listing it guards;
            // a deletion landing between list and arm would otherwise fire
            // nothing and the candidate would wait on churn that may never
            // come. The predecessor strategy instead arms after listing and
            // relies on watch_once failing fast when its target is gone.
            let pre_armed = match self.strategy {
                WatchStrategy::FullChildren => {
                    match self
                        .with_retry(cancel, || self.client.watch_children(&self.path))
                        .await
                    {
                        Ok(token) => Some(token),
                        Err(Error::Stopped) => return CandidacyOutcome::Stopped,
                        Err(_) => return self.lost(),
                    }
                }
                WatchStrategy::Predecessor => None,
            };

            let children = match self.list_with_retry(cancel).await {
                Ok(children) => children,
                Err(Error::Stopped) => return CandidacyOutcome::Stopped,
                Err(_) => return self.lost(),
            };

            let Some(own) = self.own.as_ref() else {
                return self.lost();
            };

            // Our ephemeral node vanishing out from under us means the
            // service already considers this session dead.
            if !children.iter().any(|c| c.ordinal == own.ordinal) {
                tracing::warn!(
                    "election {}: own candidate {} missing from listing",
                    self.path,
                    own.id
                );
                self.own = None;
                return self.lost();
            }

            let minimum = children
                .iter()
                .map(|c| c.ordinal)
                .min()
                .unwrap_or(own.ordinal);

            if own.ordinal == minimum {
                self.transition(LeadershipState::Leader);
                return CandidacyOutcome::Won;
            }

            let token = match pre_armed {
                Some(token) => token,
                None => match self.arm_predecessor_watch(&children, cancel).await {
                    Ok(Some(token)) => token,
                    // Watch target vanished between list and arm: re-list now
                    Ok(None) => continue,
                    Err(Error::Stopped) => return CandidacyOutcome::Stopped,
                    Err(_) => return self.lost(),
                },
            };

            tracing::debug!(
                "election {}: candidate {} waiting (minimum ordinal {})",
                self.path,
                own.id,
                minimum
            );

            let fired = token.wait();
            tokio::pin!(fired);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return CandidacyOutcome::Stopped,
                    _ = &mut fired => break, // deleted or canceled: re-list either way
                    changed = session.changed() => {
                        if changed.is_err() {
                            return self.lost();
                        }
                        match *session.borrow_and_update() {
                            SessionState::Expired => return self.lost(),
                            SessionState::Suspended => {
                                tracing::warn!("election {}: session suspended", self.path);
                            }
                            SessionState::Connected => {}
                        }
                    }
                }
            }
        }
    }

    /// Arm a fresh one-shot watch on the next-lower live ordinal; when it
    /// goes away this node re-evaluates, and nobody else is woken.
    ///
    /// `Ok(None)` means the intended target disappeared first and the
    /// caller should re-list immediately.
    async fn arm_predecessor_watch(
        &self,
        children: &[CandidateNode],
        cancel: &CancellationToken,
    ) -> Result<Option<WatchToken>> {
        let own = self.own.as_ref().ok_or(Error::SessionExpired)?;

        let Some(predecessor) = children
            .iter()
            .filter(|c| c.ordinal < own.ordinal)
            .max_by_key(|c| c.ordinal)
        else {
            // Everyone below us vanished since the listing
            return Ok(None);
        };

        match self
            .with_retry(cancel, || {
                self.client.watch_once(&self.path, &predecessor.id)
            })
            .await
        {
            Ok(token) => Ok(Some(token)),
            Err(Error::NodeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_with_retry(&self, cancel: &CancellationToken) -> Result<Vec<CandidateNode>> {
        self.with_retry(cancel, || self.client.list_children(&self.path))
            .await
    }

    /// Retry a transient-failure-prone operation with backoff. The own
    /// candidate node is untouched throughout; only exhaustion or session
    /// loss escapes.
    async fn with_retry<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    let Some(delay) = self.backoff.delay(attempt) else {
                        tracing::warn!(
                            "election {}: retries exhausted after {} attempts: {}",
                            self.path,
                            attempt,
                            e
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        "election {}: transient failure (attempt {}): {}; retrying in {:?}",
                        self.path,
                        attempt,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Stopped),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lost(&mut self) -> CandidacyOutcome {
        self.transition(LeadershipState::Lost);
        CandidacyOutcome::SessionLost
    }

    /// Leave the election: delete the own candidate node (idempotent; the
    /// service may have removed it already) and return to UNREGISTERED.
    ///
    /// A held leadership passes through `via` (RELINQUISHING or LOST) on
    /// the way out; a mere candidacy goes straight to UNREGISTERED.
    pub async fn resign(&mut self, via: LeadershipState) {
        if self.state() == LeadershipState::Leader {
            self.transition(via);
        }

        if let Some(node) = self.own.take() {
            match self.client.delete(&self.path, &node.id).await {
                Ok(()) => {
                    tracing::debug!("election {}: deleted candidate {}", self.path, node.id);
                }
                Err(e) if e.implies_session_loss() => {
                    // Session gone means the node is gone too
                }
                Err(e) => {
                    tracing::warn!(
                        "election {}: failed to delete candidate {}: {}",
                        self.path,
                        node.id,
                        e
                    );
                }
            }
        }

        self.transition(LeadershipState::Unregistered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{MemoryClient, MemoryCluster};
    use crate::config::ElectionOptions;
    use async_trait::async_trait;

    fn coordinator(
        client: Arc<dyn CoordinationClient>,
        path: &str,
    ) -> (ElectionCoordinator, watch::Receiver<LeadershipState>) {
        let (tx, rx) = watch::channel(LeadershipState::Unregistered);
        let options = ElectionOptions::default();
        let backoff = BackoffConfig {
            initial_delay_ms: 5,
            multiplier: 1.0,
            max_retries: 3,
            max_delay_ms: 10,
        };
        (
            ElectionCoordinator::new(client, path, options.watch_strategy, backoff, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_then_duplicate_rejected() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "/e");

        coord.register().await.unwrap();
        assert_eq!(coord.state(), LeadershipState::Candidate);
        let ordinal = coord.candidate().unwrap().ordinal;

        let err = coord.register().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
        // No state mutation
        assert_eq!(coord.state(), LeadershipState::Candidate);
        assert_eq!(coord.candidate().unwrap().ordinal, ordinal);
    }

    #[tokio::test]
    async fn test_register_rejects_relative_path() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "no-slash");

        let err = coord.register().await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert_eq!(coord.state(), LeadershipState::Unregistered);
    }

    #[tokio::test]
    async fn test_sole_candidate_wins_immediately() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "/e");
        let cancel = CancellationToken::new();

        coord.register().await.unwrap();
        let outcome = coord.run_candidacy(&cancel).await;
        assert_eq!(outcome, CandidacyOutcome::Won);
        assert_eq!(coord.state(), LeadershipState::Leader);
    }

    #[tokio::test]
    async fn test_lowest_ordinal_wins() {
        let cluster = MemoryCluster::new();
        let first = cluster.client();
        let leader_node = first.create_ephemeral_sequential("/e").await.unwrap();

        let (mut coord, _rx) = coordinator(cluster.client(), "/e");
        let cancel = CancellationToken::new();
        coord.register().await.unwrap();

        // A lower ordinal exists, so candidacy must block; delete it and
        // the watch fire promotes us within one cycle.
        let handle = tokio::spawn(async move {
            let outcome = coord.run_candidacy(&cancel).await;
            (coord, outcome)
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        first.delete("/e", &leader_node.id).await.unwrap();

        let (coord, outcome) = handle.await.unwrap();
        assert_eq!(outcome, CandidacyOutcome::Won);
        assert_eq!(coord.state(), LeadershipState::Leader);
    }

    #[tokio::test]
    async fn test_transient_listing_failure_is_retried() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "/e");
        let cancel = CancellationToken::new();

        coord.register().await.unwrap();
        cluster.fail_listings(2).await;

        let outcome = coord.run_candidacy(&cancel).await;
        assert_eq!(outcome, CandidacyOutcome::Won);
        // The candidate node survived the retries
        assert_eq!(cluster.node_count("/e").await, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_transitions_to_lost() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "/e");
        let cancel = CancellationToken::new();

        coord.register().await.unwrap();
        cluster.fail_listings(10).await;

        let outcome = coord.run_candidacy(&cancel).await;
        assert_eq!(outcome, CandidacyOutcome::SessionLost);
        assert_eq!(coord.state(), LeadershipState::Lost);
    }

    #[tokio::test]
    async fn test_session_expiry_during_wait() {
        let cluster = MemoryCluster::new();
        let blocker = cluster.client();
        blocker.create_ephemeral_sequential("/e").await.unwrap();

        let ours = cluster.client();
        let (mut coord, _rx) = coordinator(ours.clone(), "/e");
        let cancel = CancellationToken::new();
        coord.register().await.unwrap();

        let handle = tokio::spawn(async move {
            let outcome = coord.run_candidacy(&cancel).await;
            (coord, outcome)
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cluster.expire(&ours).await;

        let (coord, outcome) = handle.await.unwrap();
        assert_eq!(outcome, CandidacyOutcome::SessionLost);
        assert_eq!(coord.state(), LeadershipState::Lost);
    }

    #[tokio::test]
    async fn test_resign_deletes_node_and_unregisters() {
        let cluster = MemoryCluster::new();
        let (mut coord, _rx) = coordinator(cluster.client(), "/e");
        let cancel = CancellationToken::new();

        coord.register().await.unwrap();
        assert_eq!(coord.run_candidacy(&cancel).await, CandidacyOutcome::Won);

        coord.resign(LeadershipState::Relinquishing).await;
        assert_eq!(coord.state(), LeadershipState::Unregistered);
        assert_eq!(cluster.node_count("/e").await, 0);

        // Re-entry works after resigning
        coord.register().await.unwrap();
        assert_eq!(coord.state(), LeadershipState::Candidate);
    }

    /// Deletes one designated node immediately after the next listing
    /// returns, before the caller gets to act on it.
    struct RacingDeleteClient {
        inner: Arc<MemoryClient>,
        doomed: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl CoordinationClient for RacingDeleteClient {
        async fn create_ephemeral_sequential(&self, path: &str) -> Result<CandidateNode> {
            self.inner.create_ephemeral_sequential(path).await
        }

        async fn delete(&self, path: &str, node_id: &str) -> Result<()> {
            self.inner.delete(path, node_id).await
        }

        async fn list_children(&self, path: &str) -> Result<Vec<CandidateNode>> {
            let children = self.inner.list_children(path).await?;
            let doomed = self.doomed.lock().unwrap().take();
            if let Some(id) = doomed {
                self.inner.delete(path, &id).await?;
            }
            Ok(children)
        }

        async fn watch_once(&self, path: &str, node_id: &str) -> Result<WatchToken> {
            self.inner.watch_once(path, node_id).await
        }

        async fn watch_children(&self, path: &str) -> Result<WatchToken> {
            self.inner.watch_children(path).await
        }

        fn session(&self) -> watch::Receiver<SessionState> {
            self.inner.session()
        }
    }

    #[tokio::test]
    async fn test_full_children_promotes_when_leader_departs_during_listing() {
        let cluster = MemoryCluster::new();
        let first = cluster.client();
        let leader_node = first.create_ephemeral_sequential("/e").await.unwrap();

        let racing = Arc::new(RacingDeleteClient {
            inner: cluster.client(),
            doomed: std::sync::Mutex::new(Some(leader_node.id.clone())),
        });

        let (tx, _rx) = watch::channel(LeadershipState::Unregistered);
        let mut coord = ElectionCoordinator::new(
            racing,
            "/e",
            WatchStrategy::FullChildren,
            BackoffConfig::default(),
            tx,
        );
        let cancel = CancellationToken::new();
        coord.register().await.unwrap();

        // The leader vanishes while the candidacy is still looking at its
        // stale listing. The child-set watch is armed before that listing,
        // so the deletion fires it and the re-list promotes us.
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            coord.run_candidacy(&cancel),
        )
        .await
        .expect("candidacy must not stall on a departure during listing");
        assert_eq!(outcome, CandidacyOutcome::Won);
        assert_eq!(coord.state(), LeadershipState::Leader);
    }

    #[tokio::test]
    async fn test_full_children_strategy_also_promotes() {
        let cluster = MemoryCluster::new();
        let first = cluster.client();
        let leader_node = first.create_ephemeral_sequential("/e").await.unwrap();

        let (tx, _rx) = watch::channel(LeadershipState::Unregistered);
        let mut coord = ElectionCoordinator::new(
            cluster.client(),
            "/e",
            WatchStrategy::FullChildren,
            BackoffConfig::default(),
            tx,
        );
        let cancel = CancellationToken::new();
        coord.register().await.unwrap();

        let handle = tokio::spawn(async move {
            let outcome = coord.run_candidacy(&cancel).await;
            (coord, outcome)
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        first.delete("/e", &leader_node.id).await.unwrap();

        let (_, outcome) = handle.await.unwrap();
        assert_eq!(outcome, CandidacyOutcome::Won);
    }
}
