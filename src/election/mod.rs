//! Election Core
//!
//! The candidacy state machine, leadership tenure supervision, and the
//! requeue loop that ties them together.

pub mod coordinator;
pub mod supervisor;
pub mod tenure;

pub use coordinator::{CandidacyOutcome, ElectionCoordinator};
pub use supervisor::{enter, ElectionHandle};
pub use tenure::{workload_fn, ElectionListener, LeaderWorkload, LeadershipTenure, TenureReport};
