//! VolumeSnapshotBackup Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label placed on mirrored objects, carrying the owning backup request name
pub const BACKUP_REQUEST_LABEL: &str = "backup.oso.sh/volumesnapshotbackup";

/// Label placed on mirrored objects, carrying the owning backup request namespace
pub const BACKUP_REQUEST_NAMESPACE_LABEL: &str = "backup.oso.sh/volumesnapshotbackup-namespace";

/// VolumeSnapshotBackup resource specification
///
/// Requests that one CSI snapshot be mirrored into a protected namespace.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backup.oso.sh",
    version = "v1alpha1",
    kind = "VolumeSnapshotBackup",
    plural = "volumesnapshotbackups",
    singular = "volumesnapshotbackup",
    shortname = "vsb",
    namespaced,
    status = "VolumeSnapshotBackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Protected Namespace", "type": "string", "jsonPath": ".spec.protectedNamespace"}"#,
    printcolumn = r#"{"name": "Mirrored Snapshot", "type": "string", "jsonPath": ".status.mirroredSnapshot"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotBackupSpec {
    /// Source VolumeSnapshotContent to mirror
    pub volume_snapshot_content: SnapshotContentRef,

    /// Namespace the mirrored VolumeSnapshot is created in
    pub protected_namespace: String,
}

/// Reference to a cluster-scoped VolumeSnapshotContent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContentRef {
    /// VolumeSnapshotContent name
    pub name: String,
}

/// VolumeSnapshotBackup status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotBackupStatus {
    /// Current phase (Pending, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the mirrored VolumeSnapshotContent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrored_snapshot_content: Option<String>,

    /// Name of the mirrored VolumeSnapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrored_snapshot: Option<String>,

    /// Namespace holding the mirrored VolumeSnapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_namespace: Option<String>,

    /// Snapshot handle shared by the source and the mirror
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    /// Last successful mirror timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mirror_time: Option<DateTime<Utc>>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
