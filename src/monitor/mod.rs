//! Filesystem statistics collection used by the mode selector.

pub mod fs_stats;
