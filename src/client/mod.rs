//! Coordination Service Client
//!
//! The abstract contract the election core consumes. The coordination
//! service itself (storage, consensus, session keep-alive, watch delivery)
//! lives behind this trait and is assumed correct; electorate never
//! reimplements it. [`memory::MemoryCluster`] provides a single-process
//! implementation for tests and local development.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::error::Result;

/// A candidate's registration record under one election path.
///
/// The coordination service assigns `id` at creation time; `ordinal` is the
/// strictly increasing sequence number embedded in its suffix. Ordinals are
/// unique per path and never reused, so ordering candidates by ordinal can
/// never tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNode {
    /// Service-assigned node name, e.g. `candidate-0000000007`
    pub id: String,
    /// Sequence number parsed from the id suffix
    pub ordinal: u64,
    /// Election path this candidate is registered under
    pub path: String,
}

impl CandidateNode {
    /// Build a candidate record from a service-assigned id, parsing the
    /// ordinal from the trailing decimal digits.
    pub fn from_id(path: &str, id: &str) -> Result<Self> {
        let digits: String = id
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let ordinal = digits.parse::<u64>().map_err(|_| {
            crate::Error::InvalidPath(format!("no ordinal suffix in node id '{id}'"))
        })?;

        Ok(Self {
            id: id.to_string(),
            ordinal,
            path: path.to_string(),
        })
    }

    /// Full path of this node in the coordination namespace
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path, self.id)
    }
}

impl PartialOrd for CandidateNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CandidateNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal.cmp(&other.ordinal)
    }
}

/// State of the process-wide coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session is healthy
    Connected,
    /// Connectivity is degraded; ephemeral nodes still exist
    Suspended,
    /// Session is gone and every ephemeral node it owned has been removed
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Suspended => write!(f, "SUSPENDED"),
            SessionState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// What a fired watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched node was deleted
    NodeDeleted,
    /// The watch was abandoned (service shut down or session ended);
    /// the holder must re-list rather than trust any cached view
    Canceled,
}

/// A one-shot watch subscription.
///
/// Fires at most once, then is inert; the holder must arm a fresh watch
/// after every fire. Watches never auto-renew.
#[derive(Debug)]
pub struct WatchToken {
    rx: oneshot::Receiver<WatchEvent>,
}

impl WatchToken {
    /// Create a token together with the sender half that fires it
    pub fn channel() -> (oneshot::Sender<WatchEvent>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the watch to fire. A dropped sender counts as cancellation.
    pub async fn wait(self) -> WatchEvent {
        self.rx.await.unwrap_or(WatchEvent::Canceled)
    }
}

/// Abstract coordination-service client.
///
/// Methods mirror the recipe primitives of a hierarchical, watch-capable,
/// strongly-consistent store: ephemeral-sequential creation, idempotent
/// delete, ordered child listing, one-shot watches, and session state.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Create an ephemeral-sequential node under `path`.
    ///
    /// The node lives until this client's session ends or it is deleted
    /// explicitly. The service assigns the next ordinal for the path.
    async fn create_ephemeral_sequential(&self, path: &str) -> Result<CandidateNode>;

    /// Delete a node. Deleting an already-gone node succeeds.
    async fn delete(&self, path: &str, node_id: &str) -> Result<()>;

    /// List live candidates under `path`, ordered by ordinal ascending.
    async fn list_children(&self, path: &str) -> Result<Vec<CandidateNode>>;

    /// Arm a one-shot watch on an existing node under `path`.
    ///
    /// Fails with [`crate::Error::NodeNotFound`] if the node is already
    /// gone, in which case the caller should re-list immediately instead
    /// of waiting for a fire that can never come.
    async fn watch_once(&self, path: &str, node_id: &str) -> Result<WatchToken>;

    /// Arm a one-shot watch on the child set of `path`, firing when any
    /// node under it is created or deleted. Used by the full-children
    /// watch strategy; the predecessor strategy never needs it.
    async fn watch_children(&self, path: &str) -> Result<WatchToken>;

    /// Session-state channel for this client's process-wide session.
    ///
    /// `Expired` implies all of this session's ephemeral nodes are gone.
    fn session(&self) -> watch::Receiver<SessionState>;
}
