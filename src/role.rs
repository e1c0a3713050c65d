//! Role Reporting
//!
//! Non-blocking, read-only view of an election for external consumers
//! (status endpoints, health checks). Reading a role never mutates the
//! election; a read racing a transition may observe either side of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::state::LeadershipState;

/// Externally visible role of this process for one election path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// This process holds leadership
    Leader,
    /// This process is a live candidate behind the current leader
    Follower,
    /// Not currently in the candidate pool (unregistered or in transition)
    Pending,
}

impl From<LeadershipState> for Role {
    fn from(state: LeadershipState) -> Self {
        match state {
            LeadershipState::Leader => Role::Leader,
            LeadershipState::Candidate => Role::Follower,
            LeadershipState::Unregistered
            | LeadershipState::Relinquishing
            | LeadershipState::Lost => Role::Pending,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Leader => write!(f, "LEADER"),
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Pending => write!(f, "PENDING"),
        }
    }
}

/// Cheap, cloneable read handle onto one election's state
#[derive(Debug, Clone)]
pub struct RoleReporter {
    rx: watch::Receiver<LeadershipState>,
}

impl RoleReporter {
    pub(crate) fn new(rx: watch::Receiver<LeadershipState>) -> Self {
        Self { rx }
    }

    /// Current leadership state
    pub fn state(&self) -> LeadershipState {
        *self.rx.borrow()
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.state().into()
    }

    /// Whether this process currently leads
    pub fn is_leader(&self) -> bool {
        self.state() == LeadershipState::Leader
    }

    /// Wait until the state changes from the last observed value.
    ///
    /// Returns the new state, or `None` once the election is torn down.
    pub async fn changed(&mut self) -> Option<LeadershipState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow())
    }
}

/// Serializable diagnostics snapshot of one election
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionStatus {
    /// Election path
    pub path: String,
    /// Current leadership state
    pub state: LeadershipState,
    /// Current role
    pub role: Role,
    /// Candidate node id, if registered
    pub candidate_id: Option<String>,
    /// Candidate ordinal, if registered
    pub candidate_ordinal: Option<u64>,
    /// Start of the current tenure, if leading
    pub tenure_started_at: Option<DateTime<Utc>>,
    /// Most recent error surfaced by the election, if any
    pub last_error: Option<String>,
    /// When that error occurred
    pub last_error_at: Option<DateTime<Utc>>,
}
