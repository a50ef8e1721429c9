//! CSI snapshot resources (`snapshot.storage.k8s.io/v1`)
//!
//! These CRDs are installed and owned by the CSI external-snapshotter. Only
//! the fields the mirror reads or writes are modelled; the operator never
//! generates manifests for them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API version of the CSI snapshot resources
pub const SNAPSHOT_API_VERSION: &str = "snapshot.storage.k8s.io/v1";

/// VolumeSnapshotContent specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotContent",
    plural = "volumesnapshotcontents",
    singular = "volumesnapshotcontent",
    shortname = "vsc",
    status = "VolumeSnapshotContentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    /// What happens to the physical snapshot when this object is deleted
    pub deletion_policy: DeletionPolicy,

    /// CSI driver that provisioned the snapshot
    pub driver: String,

    /// Where the snapshot data comes from
    pub source: VolumeSnapshotContentSource,

    /// VolumeSnapshot bound to this content
    pub volume_snapshot_ref: SnapshotObjectReference,

    /// VolumeSnapshotClass used to take the snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    /// Volume mode of the source volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_volume_mode: Option<String>,
}

/// Deletion policy of a VolumeSnapshotContent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
}

/// Source of a VolumeSnapshotContent: exactly one of the two handles is set
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSource {
    /// Volume to snapshot (dynamically provisioned content)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_handle: Option<String>,

    /// Existing snapshot on the storage system (pre-provisioned content)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
}

/// Object reference as used by `volumeSnapshotRef`
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotObjectReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// VolumeSnapshotContent status, written by the snapshot controller
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentStatus {
    /// Handle of the snapshot on the storage system, once provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Restore size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,

    /// Creation time in nanoseconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

/// Last error reported by the snapshot controller
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl VolumeSnapshotContent {
    /// Resolved snapshot handle from status, if provisioning has finished
    pub fn status_snapshot_handle(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.snapshot_handle.as_deref())
            .filter(|h| !h.is_empty())
    }
}

/// VolumeSnapshot specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    singular = "volumesnapshot",
    shortname = "vs",
    namespaced,
    status = "VolumeSnapshotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// What the snapshot is taken from or bound to
    pub source: VolumeSnapshotSource,

    /// VolumeSnapshotClass to use for dynamic provisioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Source of a VolumeSnapshot: a PVC to snapshot, or an existing content
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// VolumeSnapshot status, written by the snapshot controller
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_deserializes_from_api_shape() {
        let content: VolumeSnapshotContent = serde_json::from_value(json!({
            "apiVersion": "snapshot.storage.k8s.io/v1",
            "kind": "VolumeSnapshotContent",
            "metadata": { "name": "snapcontent-1" },
            "spec": {
                "deletionPolicy": "Retain",
                "driver": "csi.example",
                "source": { "volumeHandle": "vol-1" },
                "volumeSnapshotClassName": "csi-class",
                "volumeSnapshotRef": {
                    "apiVersion": "snapshot.storage.k8s.io/v1",
                    "kind": "VolumeSnapshot",
                    "namespace": "app",
                    "name": "snap-1"
                }
            },
            "status": { "snapshotHandle": "snap-abc123", "readyToUse": true }
        }))
        .unwrap();

        assert_eq!(content.spec.deletion_policy, DeletionPolicy::Retain);
        assert_eq!(content.spec.source.volume_handle.as_deref(), Some("vol-1"));
        assert_eq!(content.status_snapshot_handle(), Some("snap-abc123"));
    }

    #[test]
    fn empty_status_handle_is_unresolved() {
        let mut content = VolumeSnapshotContent::new("c", VolumeSnapshotContentSpec::default());
        assert_eq!(content.status_snapshot_handle(), None);

        content.status = Some(VolumeSnapshotContentStatus {
            snapshot_handle: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(content.status_snapshot_handle(), None);
    }

    #[test]
    fn snapshot_source_serializes_content_name_only() {
        let spec = VolumeSnapshotSpec {
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: None,
                volume_snapshot_content_name: Some("pvc-1-clone".to_string()),
            },
            volume_snapshot_class_name: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            json!({ "source": { "volumeSnapshotContentName": "pvc-1-clone" } })
        );
    }
}
