//! Object store access for the mirror reconciler
//!
//! [`SnapshotStore`] is the seam between the reconciliation logic and the
//! Kubernetes API: reads by key, idempotent upserts of the mirrored objects
//! and status patches on the backup request. [`KubeSnapshotStore`] is the
//! production implementation on top of [`kube::Api`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;

use crate::crd::{
    VolumeSnapshot, VolumeSnapshotBackup, VolumeSnapshotBackupStatus, VolumeSnapshotContent,
    VolumeSnapshotContentSpec, VolumeSnapshotSpec,
};
use crate::error::{Error, Result};

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "volume-snapshot-mirror-operator";

/// Outcome of an upsert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    /// Stored object already matched the desired state
    NoChange,
    /// Object did not exist and was created
    Created,
    /// Object existed and was updated in place
    Updated,
}

impl OperationResult {
    /// Whether the store was written to
    pub fn changed(self) -> bool {
        !matches!(self, OperationResult::NoChange)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationResult::NoChange => "unchanged",
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object as persisted by an upsert, together with what the upsert did
#[derive(Clone, Debug)]
pub struct Upserted<K> {
    pub object: K,
    pub operation: OperationResult,
}

/// Trait abstracting the object store operations used by the mirror
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Get a VolumeSnapshotBackup by namespace and name
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<VolumeSnapshotBackup>;

    /// Get a cluster-scoped VolumeSnapshotContent by name
    async fn get_snapshot_content(&self, name: &str) -> Result<VolumeSnapshotContent>;

    /// Create the VolumeSnapshotContent, or bring the existing one with the
    /// same name in line with the desired labels and spec
    async fn upsert_snapshot_content(
        &self,
        desired: VolumeSnapshotContent,
    ) -> Result<Upserted<VolumeSnapshotContent>>;

    /// Create the VolumeSnapshot, or bring the existing one with the same
    /// namespace/name in line with the desired labels and spec
    async fn upsert_snapshot(&self, desired: VolumeSnapshot) -> Result<Upserted<VolumeSnapshot>>;

    /// Merge-patch the status subresource of a VolumeSnapshotBackup
    async fn patch_backup_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VolumeSnapshotBackupStatus,
    ) -> Result<()>;
}

/// Copy the desired labels onto `current`, keeping labels other writers own
pub fn merge_labels(current: &mut ObjectMeta, desired: &ObjectMeta) {
    let Some(desired_labels) = desired.labels.as_ref() else {
        return;
    };
    let labels = current.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in desired_labels {
        labels.insert(key.clone(), value.clone());
    }
}

/// Bring a stored content spec in line with `desired`, keeping the fields
/// the snapshot controller fills in after binding.
///
/// `volumeSnapshotRef.uid`/`resourceVersion` are kept while the ref still
/// points at the same namespace/name; `sourceVolumeMode` is kept unless
/// `desired` sets one.
pub fn apply_content_spec(
    current: &mut VolumeSnapshotContentSpec,
    mut desired: VolumeSnapshotContentSpec,
) {
    let bound = &current.volume_snapshot_ref;
    let wanted = &mut desired.volume_snapshot_ref;
    if bound.name == wanted.name && bound.namespace == wanted.namespace {
        if wanted.uid.is_none() {
            wanted.uid = bound.uid.clone();
        }
        if wanted.resource_version.is_none() {
            wanted.resource_version = bound.resource_version.clone();
        }
    }
    if desired.source_volume_mode.is_none() {
        desired.source_volume_mode = current.source_volume_mode.take();
    }
    *current = desired;
}

/// Bring a stored snapshot spec in line with `desired`, keeping a class name
/// the snapshot controller defaulted
pub fn apply_snapshot_spec(current: &mut VolumeSnapshotSpec, mut desired: VolumeSnapshotSpec) {
    if desired.volume_snapshot_class_name.is_none() {
        desired.volume_snapshot_class_name = current.volume_snapshot_class_name.take();
    }
    *current = desired;
}

/// Real Kubernetes client implementation
pub struct KubeSnapshotStore {
    client: Client,
}

impl KubeSnapshotStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotStore for KubeSnapshotStore {
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<VolumeSnapshotBackup> {
        let api: Api<VolumeSnapshotBackup> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "VolumeSnapshotBackup", &format!("{}/{}", namespace, name)))
    }

    async fn get_snapshot_content(&self, name: &str) -> Result<VolumeSnapshotContent> {
        let api: Api<VolumeSnapshotContent> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "VolumeSnapshotContent", name))
    }

    async fn upsert_snapshot_content(
        &self,
        desired: VolumeSnapshotContent,
    ) -> Result<Upserted<VolumeSnapshotContent>> {
        let api: Api<VolumeSnapshotContent> = Api::all(self.client.clone());
        create_or_update(&api, "VolumeSnapshotContent", desired, |current, desired| {
            merge_labels(&mut current.metadata, &desired.metadata);
            apply_content_spec(&mut current.spec, desired.spec);
        })
        .await
    }

    async fn upsert_snapshot(&self, desired: VolumeSnapshot) -> Result<Upserted<VolumeSnapshot>> {
        let namespace = desired.namespace().ok_or_else(|| {
            Error::validation(format!("VolumeSnapshot {} has no namespace", desired.name_any()))
        })?;
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), &namespace);
        create_or_update(&api, "VolumeSnapshot", desired, |current, desired| {
            merge_labels(&mut current.metadata, &desired.metadata);
            apply_snapshot_spec(&mut current.spec, desired.spec);
        })
        .await
    }

    async fn patch_backup_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VolumeSnapshotBackupStatus,
    ) -> Result<()> {
        let api: Api<VolumeSnapshotBackup> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_kube(e, "VolumeSnapshotBackup", &format!("{}/{}", namespace, name)))?;
        Ok(())
    }
}

/// Fetch by name; create when absent, otherwise apply `mutate` and replace
/// only if the object actually changed.
///
/// Replace carries the fetched `resourceVersion`, so a concurrent writer
/// surfaces as [`Error::UpsertConflict`].
async fn create_or_update<K, F>(
    api: &Api<K>,
    kind: &'static str,
    desired: K,
    mutate: F,
) -> Result<Upserted<K>>
where
    K: Resource + Clone + fmt::Debug + Serialize + DeserializeOwned,
    F: FnOnce(&mut K, K),
{
    let name = desired.name_any();
    let current = api
        .get_opt(&name)
        .await
        .map_err(|e| Error::from_kube(e, kind, &name))?;

    let Some(current) = current else {
        debug!(kind, name = %name, "Creating object");
        let object = api
            .create(&PostParams::default(), &desired)
            .await
            .map_err(|e| Error::from_kube(e, kind, &name))?;
        return Ok(Upserted {
            object,
            operation: OperationResult::Created,
        });
    };

    let mut updated = current.clone();
    mutate(&mut updated, desired);

    if serde_json::to_value(&updated)? == serde_json::to_value(&current)? {
        return Ok(Upserted {
            object: current,
            operation: OperationResult::NoChange,
        });
    }

    debug!(kind, name = %name, "Updating object");
    let object = api
        .replace(&name, &PostParams::default(), &updated)
        .await
        .map_err(|e| Error::from_kube(e, kind, &name))?;
    Ok(Upserted {
        object,
        operation: OperationResult::Updated,
    })
}
