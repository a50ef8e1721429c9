//! Volume Snapshot Mirror Kubernetes Operator
//!
//! This operator mirrors CSI volume snapshots into a protected namespace,
//! driven by `VolumeSnapshotBackup` custom resources. The mirror shares the
//! storage-level snapshot handle with its source, so no data is copied.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod reconcilers;
pub mod store;

pub use error::{Error, Result};
