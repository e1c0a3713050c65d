//! In-Process Coordination Service
//!
//! A single-process implementation of [`CoordinationClient`] that is
//! faithful to the contract: monotonic per-path ordinals that are never
//! reused, ephemeral nodes tied to a session, one-shot watches fired on
//! deletion, and session expiry that sweeps every node the session owned.
//!
//! Used by the test suite to drive multi-candidate scenarios, and usable
//! as a backend when all candidates share one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::{CandidateNode, CoordinationClient, SessionState, WatchEvent, WatchToken};
use crate::error::{Error, Result};

/// One registered node and the watches armed on it
struct NodeRecord {
    node: CandidateNode,
    session: Uuid,
    watchers: Vec<tokio::sync::oneshot::Sender<WatchEvent>>,
}

/// State of one election path
#[derive(Default)]
struct PathState {
    next_ordinal: u64,
    nodes: BTreeMap<u64, NodeRecord>,
    child_watchers: Vec<tokio::sync::oneshot::Sender<WatchEvent>>,
}

#[derive(Default)]
struct ClusterInner {
    paths: HashMap<String, PathState>,
    /// Pending injected failures for `list_children` (test hook)
    list_failures: u32,
}

/// Shared in-process coordination service
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterInner>>,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a client handle with a fresh connected session
    pub fn client(&self) -> Arc<MemoryClient> {
        let (session_tx, session_rx) = watch::channel(SessionState::Connected);
        Arc::new(MemoryClient {
            cluster: self.clone(),
            session_id: Mutex::new(Uuid::new_v4()),
            session_tx,
            session_rx,
        })
    }

    /// Expire a client's session: remove every ephemeral node it owns,
    /// fire the watches on those nodes, and flip the session to EXPIRED.
    pub async fn expire(&self, client: &MemoryClient) {
        let session = *client.session_id.lock().await;
        {
            let mut inner = self.inner.lock().await;
            for path in inner.paths.values_mut() {
                let doomed: Vec<u64> = path
                    .nodes
                    .iter()
                    .filter(|(_, rec)| rec.session == session)
                    .map(|(ord, _)| *ord)
                    .collect();

                for ordinal in doomed {
                    if let Some(rec) = path.nodes.remove(&ordinal) {
                        for tx in rec.watchers {
                            let _ = tx.send(WatchEvent::NodeDeleted);
                        }
                    }
                    for tx in path.child_watchers.drain(..) {
                        let _ = tx.send(WatchEvent::NodeDeleted);
                    }
                }
            }
        }
        let _ = client.session_tx.send(SessionState::Expired);
    }

    /// Start a fresh session for a client after expiry
    pub async fn reconnect(&self, client: &MemoryClient) {
        *client.session_id.lock().await = Uuid::new_v4();
        let _ = client.session_tx.send(SessionState::Connected);
    }

    /// Mark a client's session as suspended (connectivity degraded)
    pub fn suspend(&self, client: &MemoryClient) {
        let _ = client.session_tx.send(SessionState::Suspended);
    }

    /// Restore a suspended client's session
    pub fn resume(&self, client: &MemoryClient) {
        let _ = client.session_tx.send(SessionState::Connected);
    }

    /// Make the next `count` calls to `list_children` fail with a
    /// transient connection error (test hook for the retry path)
    pub async fn fail_listings(&self, count: u32) {
        self.inner.lock().await.list_failures = count;
    }

    /// Number of live nodes under a path
    pub async fn node_count(&self, path: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.paths.get(path).map_or(0, |p| p.nodes.len())
    }
}

/// One session's handle onto a [`MemoryCluster`]
pub struct MemoryClient {
    cluster: MemoryCluster,
    session_id: Mutex<Uuid>,
    session_tx: watch::Sender<SessionState>,
    session_rx: watch::Receiver<SessionState>,
}

impl MemoryClient {
    fn ensure_live(&self) -> Result<()> {
        if *self.session_rx.borrow() == SessionState::Expired {
            return Err(Error::SessionExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn create_ephemeral_sequential(&self, path: &str) -> Result<CandidateNode> {
        self.ensure_live()?;
        let session = *self.session_id.lock().await;
        let mut inner = self.cluster.inner.lock().await;
        let state = inner.paths.entry(path.to_string()).or_default();

        let ordinal = state.next_ordinal;
        state.next_ordinal += 1;

        let node = CandidateNode {
            id: format!("candidate-{ordinal:010}"),
            ordinal,
            path: path.to_string(),
        };

        state.nodes.insert(
            ordinal,
            NodeRecord {
                node: node.clone(),
                session,
                watchers: Vec::new(),
            },
        );
        for tx in state.child_watchers.drain(..) {
            let _ = tx.send(WatchEvent::NodeDeleted);
        }

        Ok(node)
    }

    async fn delete(&self, path: &str, node_id: &str) -> Result<()> {
        self.ensure_live()?;
        let mut inner = self.cluster.inner.lock().await;
        let Some(state) = inner.paths.get_mut(path) else {
            return Ok(()); // nothing there: idempotent
        };

        let ordinal = state
            .nodes
            .values()
            .find(|rec| rec.node.id == node_id)
            .map(|rec| rec.node.ordinal);

        if let Some(ordinal) = ordinal {
            if let Some(rec) = state.nodes.remove(&ordinal) {
                for tx in rec.watchers {
                    let _ = tx.send(WatchEvent::NodeDeleted);
                }
            }
            for tx in state.child_watchers.drain(..) {
                let _ = tx.send(WatchEvent::NodeDeleted);
            }
        }

        Ok(())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<CandidateNode>> {
        self.ensure_live()?;
        let mut inner = self.cluster.inner.lock().await;
        if inner.list_failures > 0 {
            inner.list_failures -= 1;
            return Err(Error::Connection("injected listing failure".into()));
        }

        // BTreeMap keys are the ordinals, so iteration is already ascending
        Ok(inner
            .paths
            .get(path)
            .map(|p| p.nodes.values().map(|rec| rec.node.clone()).collect())
            .unwrap_or_default())
    }

    async fn watch_once(&self, path: &str, node_id: &str) -> Result<WatchToken> {
        self.ensure_live()?;
        let mut inner = self.cluster.inner.lock().await;
        let record = inner
            .paths
            .get_mut(path)
            .and_then(|p| p.nodes.values_mut().find(|rec| rec.node.id == node_id))
            .ok_or_else(|| Error::NodeNotFound(format!("{path}/{node_id}")))?;

        let (tx, token) = WatchToken::channel();
        record.watchers.push(tx);
        Ok(token)
    }

    async fn watch_children(&self, path: &str) -> Result<WatchToken> {
        self.ensure_live()?;
        let mut inner = self.cluster.inner.lock().await;
        let state = inner.paths.entry(path.to_string()).or_default();

        let (tx, token) = WatchToken::channel();
        state.child_watchers.push(tx);
        Ok(token)
    }

    fn session(&self) -> watch::Receiver<SessionState> {
        self.session_rx.clone()
    }
}
