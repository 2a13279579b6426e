//! Safety gate evaluated immediately before every delete.

pub mod validator;

pub use validator::{BlockedReason, ProtectedPaths, ValidationOutcome, validate};
