//! Leadership State
//!
//! The per-path leadership state machine values. Exactly one value exists
//! per (process, election path) at any instant, owned by that path's
//! coordinator; everyone else observes it through a watch channel.

use serde::{Deserialize, Serialize};

/// Leadership state for one election path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadershipState {
    /// Not participating: no candidate node exists for this process
    Unregistered,
    /// Registered and waiting; some lower ordinal currently leads
    Candidate,
    /// This process holds leadership and the workload is running
    Leader,
    /// Voluntarily giving up leadership; workload is winding down
    Relinquishing,
    /// Leadership was lost involuntarily (session expiry or forced end)
    Lost,
}

impl LeadershipState {
    /// Whether a candidate node currently exists for this process
    pub fn is_registered(&self) -> bool {
        matches!(self, LeadershipState::Candidate | LeadershipState::Leader)
    }
}

impl std::fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipState::Unregistered => write!(f, "UNREGISTERED"),
            LeadershipState::Candidate => write!(f, "CANDIDATE"),
            LeadershipState::Leader => write!(f, "LEADER"),
            LeadershipState::Relinquishing => write!(f, "RELINQUISHING"),
            LeadershipState::Lost => write!(f, "LOST"),
        }
    }
}

/// How a leadership tenure ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenureEnd {
    /// Voluntary: relinquish was requested, or the workload returned
    Relinquished,
    /// Involuntary: session expired, or the workload missed the grace period
    Lost,
}

impl std::fmt::Display for TenureEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenureEnd::Relinquished => write!(f, "RELINQUISHED"),
            TenureEnd::Lost => write!(f, "LOST"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_states() {
        assert!(LeadershipState::Candidate.is_registered());
        assert!(LeadershipState::Leader.is_registered());
        assert!(!LeadershipState::Unregistered.is_registered());
        assert!(!LeadershipState::Relinquishing.is_registered());
        assert!(!LeadershipState::Lost.is_registered());
    }

    #[test]
    fn test_display() {
        assert_eq!(LeadershipState::Leader.to_string(), "LEADER");
        assert_eq!(TenureEnd::Lost.to_string(), "LOST");
    }
}
