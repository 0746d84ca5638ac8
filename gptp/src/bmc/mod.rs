//! Best master clock algorithm

mod bmca;

pub use bmca::AnnounceRecord;
pub(crate) use bmca::{run_state_decision, RecommendedRole, StateDecision};
