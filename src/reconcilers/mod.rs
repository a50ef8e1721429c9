//! Reconcilers for the Volume Snapshot Mirror Operator
//!
//! This module contains the business logic behind the controller:
//! - Validating and loading backup requests
//! - Mirroring snapshot contents and snapshots into the protected namespace
//! - Updating backup request status

pub mod mirror;
pub mod status;
