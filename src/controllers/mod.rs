//! Kubernetes controllers for the Volume Snapshot Mirror Operator
//!
//! This module contains the controller that watches VolumeSnapshotBackup
//! resources and triggers reconciliation.

mod mirror_controller;

pub use mirror_controller::{error_policy_for, reconcile, run as run_mirror_controller};

use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::store::{KubeSnapshotStore, SnapshotStore};

/// Shared context for the controller
pub struct Context {
    /// Object store access
    pub store: Arc<dyn SnapshotStore>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a context backed by the Kubernetes API
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            store: Arc::new(KubeSnapshotStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, &config.controller_name)),
            config,
        }
    }

    /// Create a context from explicit collaborators
    pub fn with_collaborators(
        store: Arc<dyn SnapshotStore>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }
}
