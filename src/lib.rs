//! Electorate - Leader Election over a Coordination Service
//!
//! Elects exactly one active leader among cooperating processes using a
//! shared hierarchical coordination service (a strongly-consistent,
//! watch-capable node store) as the source of truth. Services that need
//! single-writer semantics use it to decide which process acts. When the
//! leader crashes, the next candidate takes over without manual
//! intervention.
//!
//! # Algorithm
//!
//! Each participant registers an ephemeral-sequential candidate node under
//! an election path. The candidate holding the minimum ordinal leads;
//! every other candidate watches its immediate predecessor and re-evaluates
//! when that predecessor disappears, so a leader crash promotes exactly the
//! next candidate without a notification storm. Ordinals are unique and
//! never reused, so ties are impossible by construction.
//!
//! The coordination service itself lives behind the
//! [`client::CoordinationClient`] trait and is assumed correct; this crate
//! implements the election recipe, not the consensus store.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use electorate::prelude::*;
//!
//! # async fn demo(client: Arc<dyn CoordinationClient>) -> electorate::Result<()> {
//! let handle = electorate::enter(
//!     client,
//!     "/services/scheduler/leader",
//!     workload_fn(|cancel| async move {
//!         // leader-only work; check `cancel` at safe points
//!         cancel.cancelled().await;
//!         Ok(())
//!     }),
//!     None,
//!     ElectionConfig::default(),
//! )?;
//!
//! if handle.is_leader() {
//!     // non-blocking role read for status endpoints
//! }
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod election;
pub mod error;
pub mod role;
pub mod state;

pub use config::ElectionConfig;
pub use election::{enter, ElectionHandle};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{CandidateNode, CoordinationClient, SessionState};
    pub use crate::config::{BackoffConfig, ElectionConfig, ElectionOptions, WatchStrategy};
    pub use crate::election::{
        enter, workload_fn, ElectionHandle, ElectionListener, LeaderWorkload,
    };
    pub use crate::error::{Error, Result};
    pub use crate::role::{ElectionStatus, Role, RoleReporter};
    pub use crate::state::{LeadershipState, TenureEnd};
}
