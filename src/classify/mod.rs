//! Candidate -> Decision pipeline: effective-policy resolution, mode selection.

pub mod classifier;
pub mod decision;
pub mod mode_selector;

pub use classifier::{EffectivePolicy, classify_candidate, resolve_effective_policy};
pub use decision::{Action, Decision, Mode, PrimaryReason};
pub use mode_selector::{order_for_deletion, select_mode};
