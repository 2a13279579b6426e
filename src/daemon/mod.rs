//! Daemon subsystem: the cooperative cleanup-cycle scheduler and OS signal
//! handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
