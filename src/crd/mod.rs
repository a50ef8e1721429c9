//! Custom Resource Definitions for the Volume Snapshot Mirror Operator

mod volume_snapshot;
mod volume_snapshot_backup;

pub use volume_snapshot::*;
pub use volume_snapshot_backup::*;

use kube::CustomResourceExt;

/// Generate YAML manifests for the CRDs this operator owns
///
/// The CSI snapshot CRDs are installed by the external-snapshotter and are
/// deliberately left out.
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&VolumeSnapshotBackup::crd())?])
}
