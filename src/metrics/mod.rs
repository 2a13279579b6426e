//! Prometheus-style metric registry and the HTTP exposition surface.

pub mod registry;
pub mod server;

pub use registry::Metrics;
pub use server::{ServerHandle, serve};
