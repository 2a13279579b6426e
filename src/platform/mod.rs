//! Platform abstraction layer: filesystem stats, mounts, memory info.

pub mod pal;
