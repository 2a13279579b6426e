//! Executes (or simulates) the mutating syscall for one DELETE decision and
//! records the outcome, in the order the global invariants require: unlink,
//! then counters, then audit.

pub mod deleter;

pub use deleter::Deleter;
