//! VolumeSnapshot mirror reconciler
//!
//! Mirrors the VolumeSnapshotContent referenced by a VolumeSnapshotBackup
//! into the request's protected namespace:
//! - loads the backup request and its source content
//! - builds a `<source>-clone` content pointing at the same snapshot handle
//! - builds a VolumeSnapshot in the protected namespace bound to that content
//! - upserts both and emits an Event for every write
//!
//! Both upserts are idempotent and no rollback is attempted. If the content
//! upsert succeeds and the snapshot upsert fails, the next reconciliation
//! derives the same names and completes the pair.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::crd::{
    SnapshotObjectReference, VolumeSnapshot, VolumeSnapshotBackup, VolumeSnapshotContent,
    VolumeSnapshotContentSource, VolumeSnapshotContentSpec, VolumeSnapshotSource,
    VolumeSnapshotSpec, BACKUP_REQUEST_LABEL, BACKUP_REQUEST_NAMESPACE_LABEL,
    SNAPSHOT_API_VERSION,
};
use crate::error::{Error, Result};
use crate::events::{actions, reasons, EventPublisher};
use crate::metrics;
use crate::store::{OperationResult, SnapshotStore, Upserted};

/// Suffix of mirrored VolumeSnapshotContent names
pub const CONTENT_SUFFIX: &str = "-clone";

/// Suffix appended to the mirrored content name to name the VolumeSnapshot
pub const SNAPSHOT_SUFFIX: &str = "-volumesnapshot";

/// Longest name the API server accepts for either object
const MAX_NAME_LENGTH: usize = 253;

/// Longest namespace name (RFC 1123 label)
const MAX_NAMESPACE_LENGTH: usize = 63;

/// Longest label value; the backup request name is stored in one
const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Hex characters of the request digest used by per-request naming
const REQUEST_DIGEST_LENGTH: usize = 10;

/// How mirrored object names are derived
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MirrorNaming {
    /// `<source>-clone`: one mirror per source content
    #[default]
    PerSource,
    /// `<source>-<digest>-clone`, where the digest covers the backup
    /// request's `namespace/name`: one mirror per source content and backup
    /// request, so requests sharing a source never collide
    PerBackupRequest,
}

impl MirrorNaming {
    /// Name of the mirrored VolumeSnapshotContent
    pub fn content_name(self, source_content: &str, request: &BackupRequestKey) -> String {
        match self {
            MirrorNaming::PerSource => format!("{}{}", source_content, CONTENT_SUFFIX),
            MirrorNaming::PerBackupRequest => format!(
                "{}-{}{}",
                source_content,
                request_digest(request),
                CONTENT_SUFFIX
            ),
        }
    }
}

/// Fixed-length hex digest of `namespace/name`
///
/// Neither part may contain `/`, so distinct requests hash distinct input.
fn request_digest(request: &BackupRequestKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.to_string().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(REQUEST_DIGEST_LENGTH);
    digest
}

impl FromStr for MirrorNaming {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per-source" => Ok(MirrorNaming::PerSource),
            "per-backup-request" => Ok(MirrorNaming::PerBackupRequest),
            other => Err(format!(
                "unknown naming scheme '{}': must be one of: per-source, per-backup-request",
                other
            )),
        }
    }
}

impl fmt::Display for MirrorNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorNaming::PerSource => f.write_str("per-source"),
            MirrorNaming::PerBackupRequest => f.write_str("per-backup-request"),
        }
    }
}

/// Name of the mirrored VolumeSnapshot for a mirrored content name
pub fn snapshot_name(content_name: &str) -> String {
    format!("{}{}", content_name, SNAPSHOT_SUFFIX)
}

/// Namespace/name of a VolumeSnapshotBackup
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackupRequestKey {
    pub namespace: String,
    pub name: String,
}

impl BackupRequestKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object received from the API server
    pub fn from_resource(backup: &VolumeSnapshotBackup) -> Result<Self> {
        let namespace = backup.namespace().ok_or_else(|| {
            Error::validation(format!(
                "VolumeSnapshotBackup {} has no namespace",
                backup.name_any()
            ))
        })?;
        Ok(Self::new(namespace, backup.name_any()))
    }
}

impl fmt::Display for BackupRequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of a successful mirror
#[derive(Clone, Debug)]
pub struct MirrorOutcome {
    /// Mirrored VolumeSnapshotContent as persisted
    pub snapshot_content: VolumeSnapshotContent,
    /// What the content upsert did
    pub content_operation: OperationResult,
    /// Mirrored VolumeSnapshot as persisted
    pub snapshot: VolumeSnapshot,
    /// What the snapshot upsert did
    pub snapshot_operation: OperationResult,
    /// Handle shared by the source content and its mirror
    pub snapshot_handle: String,
}

impl MirrorOutcome {
    /// Whether either upsert wrote to the store
    pub fn changed(&self) -> bool {
        self.content_operation.changed() || self.snapshot_operation.changed()
    }
}

/// Validate the VolumeSnapshotBackup spec
pub fn validate(backup: &VolumeSnapshotBackup, naming: MirrorNaming) -> Result<()> {
    let source = &backup.spec.volume_snapshot_content.name;
    if source.is_empty() {
        return Err(Error::validation(
            "volumeSnapshotContent.name must not be empty",
        ));
    }

    validate_namespace(&backup.spec.protected_namespace)?;

    let request = BackupRequestKey::from_resource(backup)?;
    if request.name.len() > MAX_LABEL_VALUE_LENGTH {
        return Err(Error::validation(format!(
            "VolumeSnapshotBackup name '{}' exceeds {} characters and cannot be used as a label value",
            request.name, MAX_LABEL_VALUE_LENGTH
        )));
    }

    let content = naming.content_name(source, &request);
    let snapshot = snapshot_name(&content);
    if snapshot.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(format!(
            "mirrored VolumeSnapshot name '{}' exceeds {} characters",
            snapshot, MAX_NAME_LENGTH
        )));
    }

    Ok(())
}

/// Protected namespace must be an RFC 1123 label
fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::validation("protectedNamespace must not be empty"));
    }
    if namespace.len() > MAX_NAMESPACE_LENGTH {
        return Err(Error::validation(format!(
            "protectedNamespace '{}' exceeds {} characters",
            namespace, MAX_NAMESPACE_LENGTH
        )));
    }

    let valid_chars = namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !namespace.starts_with('-') && !namespace.ends_with('-');
    if !valid_chars || !valid_edges {
        return Err(Error::validation(format!(
            "Invalid protectedNamespace '{}': must be a lowercase RFC 1123 label",
            namespace
        )));
    }
    Ok(())
}

/// Load the backup request and the source content it references
pub async fn load_request(
    store: &dyn SnapshotStore,
    key: &BackupRequestKey,
    naming: MirrorNaming,
) -> Result<(VolumeSnapshotBackup, VolumeSnapshotContent)> {
    let backup = store
        .get_backup(&key.namespace, &key.name)
        .await
        .inspect_err(|e| error!(request = %key, error = %e, "Unable to fetch VolumeSnapshotBackup"))?;

    validate(&backup, naming)?;

    let content_name = &backup.spec.volume_snapshot_content.name;
    let source = store
        .get_snapshot_content(content_name)
        .await
        .inspect_err(|e| {
            error!(
                request = %key,
                content = %content_name,
                error = %e,
                "Unable to fetch source VolumeSnapshotContent"
            )
        })?;

    Ok((backup, source))
}

/// Fill `target.spec` so it points at the same snapshot handle as `source`,
/// bound to a VolumeSnapshot in the backup request's protected namespace.
///
/// `target` must already carry its name; metadata is left untouched.
pub fn build_snapshot_content(
    target: &mut VolumeSnapshotContent,
    source: &VolumeSnapshotContent,
    backup: &VolumeSnapshotBackup,
) -> Result<()> {
    let source_name = source.name_any();
    let handle = source
        .status_snapshot_handle()
        .ok_or_else(|| Error::SourceNotReady(source_name.clone()))?;

    let target_name = target.name_any();
    if target_name.is_empty() {
        return Err(Error::validation(
            "mirrored VolumeSnapshotContent must be named before its spec is built",
        ));
    }

    let source_ref = &source.spec.volume_snapshot_ref;
    target.spec = VolumeSnapshotContentSpec {
        deletion_policy: source.spec.deletion_policy,
        driver: source.spec.driver.clone(),
        source: VolumeSnapshotContentSource {
            volume_handle: None,
            snapshot_handle: Some(handle.to_string()),
        },
        volume_snapshot_ref: SnapshotObjectReference {
            api_version: source_ref
                .api_version
                .clone()
                .or_else(|| Some(SNAPSHOT_API_VERSION.to_string())),
            kind: source_ref
                .kind
                .clone()
                .or_else(|| Some("VolumeSnapshot".to_string())),
            namespace: Some(backup.spec.protected_namespace.clone()),
            name: Some(snapshot_name(&target_name)),
            uid: None,
            resource_version: None,
        },
        volume_snapshot_class_name: source.spec.volume_snapshot_class_name.clone(),
        source_volume_mode: None,
    };

    Ok(())
}

/// Fill `target.spec` so the VolumeSnapshot binds to `content`
pub fn build_snapshot(target: &mut VolumeSnapshot, content: &VolumeSnapshotContent) -> Result<()> {
    let content_name = content.name_any();
    let ref_name = content.spec.volume_snapshot_ref.name.as_deref().unwrap_or_default();
    if content_name.is_empty() || ref_name.is_empty() {
        return Err(Error::validation(format!(
            "VolumeSnapshotContent '{}' has no volumeSnapshotRef name",
            content_name
        )));
    }

    target.spec = VolumeSnapshotSpec {
        source: VolumeSnapshotSource {
            persistent_volume_claim_name: None,
            volume_snapshot_content_name: Some(content_name),
        },
        volume_snapshot_class_name: None,
    };

    Ok(())
}

fn ownership_labels(request: &BackupRequestKey) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BACKUP_REQUEST_LABEL.to_string(), request.name.clone()),
        (
            BACKUP_REQUEST_NAMESPACE_LABEL.to_string(),
            request.namespace.clone(),
        ),
    ])
}

/// Desired mirrored VolumeSnapshotContent for the request
pub fn desired_snapshot_content(
    source: &VolumeSnapshotContent,
    backup: &VolumeSnapshotBackup,
    naming: MirrorNaming,
) -> Result<VolumeSnapshotContent> {
    let request = BackupRequestKey::from_resource(backup)?;
    let name = naming.content_name(&source.name_any(), &request);
    let mut content = VolumeSnapshotContent::new(&name, VolumeSnapshotContentSpec::default());
    content.metadata.labels = Some(ownership_labels(&request));
    build_snapshot_content(&mut content, source, backup)?;
    Ok(content)
}

/// Desired mirrored VolumeSnapshot, named and placed by the content's ref
pub fn desired_snapshot(
    content: &VolumeSnapshotContent,
    backup: &VolumeSnapshotBackup,
) -> Result<VolumeSnapshot> {
    let snapshot_ref = &content.spec.volume_snapshot_ref;
    let name = snapshot_ref.name.clone().unwrap_or_default();
    let namespace = snapshot_ref.namespace.clone().ok_or_else(|| {
        Error::validation(format!(
            "VolumeSnapshotContent '{}' has no volumeSnapshotRef namespace",
            content.name_any()
        ))
    })?;

    let mut snapshot = VolumeSnapshot::new(&name, VolumeSnapshotSpec::default());
    snapshot.metadata.namespace = Some(namespace);
    snapshot.metadata.labels = Some(ownership_labels(&BackupRequestKey::from_resource(backup)?));
    build_snapshot(&mut snapshot, content)?;
    Ok(snapshot)
}

/// Mirror the snapshot referenced by the backup request `key`
///
/// Errors are returned as-is: no retry, no rollback. Retry is the control
/// loop's job.
pub async fn mirror_volume_snapshot(
    store: &dyn SnapshotStore,
    events: &dyn EventPublisher,
    naming: MirrorNaming,
    key: &BackupRequestKey,
) -> Result<MirrorOutcome> {
    let (backup, source) = load_request(store, key, naming).await?;

    let desired_content = desired_snapshot_content(&source, &backup, naming)?;
    let snapshot_handle = desired_content
        .spec
        .source
        .snapshot_handle
        .clone()
        .unwrap_or_default();

    let content = store.upsert_snapshot_content(desired_content).await?;
    record_upsert(events, "volumesnapshotcontent", &content).await;

    let desired = desired_snapshot(&content.object, &backup)?;
    let snapshot = store.upsert_snapshot(desired).await?;
    record_upsert(events, "volumesnapshot", &snapshot).await;

    info!(
        request = %key,
        content = %content.object.name_any(),
        snapshot = %snapshot.object.name_any(),
        namespace = snapshot.object.namespace().as_deref().unwrap_or_default(),
        content_operation = %content.operation,
        snapshot_operation = %snapshot.operation,
        "Mirrored VolumeSnapshot"
    );

    Ok(MirrorOutcome {
        snapshot_content: content.object,
        content_operation: content.operation,
        snapshot: snapshot.object,
        snapshot_operation: snapshot.operation,
        snapshot_handle,
    })
}

/// Count the upsert and publish a Normal event if it wrote anything
async fn record_upsert<K>(events: &dyn EventPublisher, kind: &str, upserted: &Upserted<K>)
where
    K: Resource<DynamicType = ()>,
{
    metrics::MIRROR_UPSERTS
        .with_label_values(&[kind, upserted.operation.as_str()])
        .inc();

    let name = upserted.object.name_any();
    if !upserted.operation.changed() {
        debug!(kind, name = %name, "Mirrored object already up to date");
        return;
    }

    let reason = if kind == "volumesnapshot" {
        reasons::SNAPSHOT_RECONCILED
    } else {
        reasons::SNAPSHOT_CONTENT_RECONCILED
    };
    events
        .publish(
            &upserted.object.object_ref(&()),
            EventType::Normal,
            reason,
            actions::MIRROR,
            Some(format!("performed {} on {} {}", upserted.operation, kind, name)),
        )
        .await;
}
