//! Lazy directory scanner: emits [`candidate::Candidate`] records for the classifier.

pub mod candidate;
pub mod walker;

pub use candidate::{Candidate, ObjectType, ScanFault};
pub use walker::{Scanner, WalkerConfig};
