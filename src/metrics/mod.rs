//! Prometheus metrics for the Volume Snapshot Mirror Operator
//!
//! This module exposes metrics for monitoring operator health and performance.

mod prometheus;

pub use prometheus::*;
