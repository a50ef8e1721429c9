//! VolumeSnapshotBackup status reporting
//!
//! Builds the status for a mirror result and patches it only when it
//! differs from what is stored, so a steady-state reconcile does not write
//! (and therefore does not retrigger itself).

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::debug;

use crate::crd::{Condition, VolumeSnapshotBackup, VolumeSnapshotBackupStatus};
use crate::error::{Error, Result};
use crate::reconcilers::mirror::{BackupRequestKey, MirrorOutcome};
use crate::store::SnapshotStore;

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_COMPLETED: &str = "Completed";
pub const PHASE_FAILED: &str = "Failed";

/// Condition type carried on every status
pub const CONDITION_READY: &str = "Ready";

/// Status after a successful mirror
pub fn mirrored_status(
    backup: &VolumeSnapshotBackup,
    outcome: &MirrorOutcome,
    now: DateTime<Utc>,
) -> VolumeSnapshotBackupStatus {
    let previous = backup.status.as_ref();
    let snapshot = outcome.snapshot.name_any();
    let namespace = outcome.snapshot.namespace().unwrap_or_default();
    let message = format!("Snapshot mirrored to {}/{}", namespace, snapshot);

    // Only move the timestamp when something was written, keeping the
    // steady-state status byte-identical.
    let last_mirror_time = match previous.and_then(|s| s.last_mirror_time) {
        Some(last) if !outcome.changed() => Some(last),
        _ => Some(now),
    };

    VolumeSnapshotBackupStatus {
        phase: Some(PHASE_COMPLETED.to_string()),
        message: Some(message.clone()),
        mirrored_snapshot_content: Some(outcome.snapshot_content.name_any()),
        mirrored_snapshot: Some(snapshot),
        protected_namespace: Some(namespace),
        snapshot_handle: Some(outcome.snapshot_handle.clone()),
        last_mirror_time,
        observed_generation: backup.metadata.generation,
        conditions: vec![ready_condition(previous, "True", "SnapshotMirrored", &message, now)],
    }
}

/// Status after a failed mirror
///
/// Retryable errors leave the request `Pending`; errors that need a spec
/// change mark it `Failed`. Names of an earlier successful mirror are kept.
pub fn failed_status(
    backup: &VolumeSnapshotBackup,
    error: &Error,
    now: DateTime<Utc>,
) -> VolumeSnapshotBackupStatus {
    let previous = backup.status.as_ref();
    let phase = if error.is_retryable() {
        PHASE_PENDING
    } else {
        PHASE_FAILED
    };
    let message = error.to_string();

    VolumeSnapshotBackupStatus {
        phase: Some(phase.to_string()),
        message: Some(message.clone()),
        observed_generation: backup.metadata.generation,
        conditions: vec![ready_condition(previous, "False", error.class(), &message, now)],
        ..previous.cloned().unwrap_or_default()
    }
}

/// Whether `desired` is a failure that `previous` did not already record
pub fn entered_failure(
    previous: Option<&VolumeSnapshotBackupStatus>,
    desired: &VolumeSnapshotBackupStatus,
) -> bool {
    if desired.phase.as_deref() != Some(PHASE_FAILED) {
        return false;
    }
    match previous {
        Some(previous) => {
            previous.phase.as_deref() != Some(PHASE_FAILED) || previous.message != desired.message
        }
        None => true,
    }
}

/// Ready condition, keeping the previous transition time if the status
/// value did not flip
fn ready_condition(
    previous: Option<&VolumeSnapshotBackupStatus>,
    status: &str,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Condition {
    let last_transition_time = previous
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == CONDITION_READY))
        .filter(|c| c.status == status)
        .map(|c| c.last_transition_time)
        .unwrap_or(now);

    Condition {
        type_: CONDITION_READY.to_string(),
        status: status.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Patch `desired` onto the backup request unless it is already stored.
///
/// Returns whether a patch was sent.
pub async fn report(
    store: &dyn SnapshotStore,
    backup: &VolumeSnapshotBackup,
    desired: &VolumeSnapshotBackupStatus,
) -> Result<bool> {
    if backup.status.as_ref() == Some(desired) {
        debug!(name = %backup.name_any(), "Status unchanged, skipping patch");
        return Ok(false);
    }

    let key = BackupRequestKey::from_resource(backup)?;
    store
        .patch_backup_status(&key.namespace, &key.name, desired)
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        SnapshotContentRef, VolumeSnapshot, VolumeSnapshotBackupSpec, VolumeSnapshotContent,
    };
    use crate::store::{MockSnapshotStore, OperationResult};
    use chrono::Duration;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn backup(status: Option<VolumeSnapshotBackupStatus>) -> VolumeSnapshotBackup {
        VolumeSnapshotBackup {
            metadata: ObjectMeta {
                name: Some("br-1".to_string()),
                namespace: Some("app".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: VolumeSnapshotBackupSpec {
                volume_snapshot_content: SnapshotContentRef {
                    name: "pvc-1".to_string(),
                },
                protected_namespace: "protected-ns".to_string(),
            },
            status,
        }
    }

    fn outcome(operation: OperationResult) -> MirrorOutcome {
        let mut snapshot = VolumeSnapshot::new("pvc-1-clone-volumesnapshot", Default::default());
        snapshot.metadata.namespace = Some("protected-ns".to_string());
        MirrorOutcome {
            snapshot_content: VolumeSnapshotContent::new("pvc-1-clone", Default::default()),
            content_operation: operation,
            snapshot,
            snapshot_operation: operation,
            snapshot_handle: "snap-abc123".to_string(),
        }
    }

    #[test]
    fn mirrored_status_records_names_and_handle() {
        let now = Utc::now();
        let status = mirrored_status(&backup(None), &outcome(OperationResult::Created), now);

        assert_eq!(status.phase.as_deref(), Some(PHASE_COMPLETED));
        assert_eq!(status.mirrored_snapshot_content.as_deref(), Some("pvc-1-clone"));
        assert_eq!(status.mirrored_snapshot.as_deref(), Some("pvc-1-clone-volumesnapshot"));
        assert_eq!(status.protected_namespace.as_deref(), Some("protected-ns"));
        assert_eq!(status.snapshot_handle.as_deref(), Some("snap-abc123"));
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.last_mirror_time, Some(now));
        assert_eq!(status.conditions[0].status, "True");
    }

    #[test]
    fn steady_state_status_is_stable() {
        let earlier = Utc::now() - Duration::minutes(10);
        let first = mirrored_status(&backup(None), &outcome(OperationResult::Created), earlier);
        let second = mirrored_status(
            &backup(Some(first.clone())),
            &outcome(OperationResult::NoChange),
            Utc::now(),
        );

        assert_eq!(first, second);
    }

    #[test]
    fn update_moves_last_mirror_time() {
        let earlier = Utc::now() - Duration::minutes(10);
        let first = mirrored_status(&backup(None), &outcome(OperationResult::Created), earlier);
        let now = Utc::now();
        let second = mirrored_status(
            &backup(Some(first.clone())),
            &outcome(OperationResult::Updated),
            now,
        );

        assert_eq!(second.last_mirror_time, Some(now));
        assert_eq!(second.conditions[0].last_transition_time, earlier);
    }

    #[test]
    fn retryable_failure_is_pending() {
        let status = failed_status(
            &backup(None),
            &Error::SourceNotReady("pvc-1".to_string()),
            Utc::now(),
        );
        assert_eq!(status.phase.as_deref(), Some(PHASE_PENDING));
        assert_eq!(status.conditions[0].reason.as_deref(), Some("SourceNotReady"));
        assert_eq!(status.conditions[0].status, "False");
    }

    #[test]
    fn terminal_failure_is_failed_and_keeps_previous_mirror() {
        let earlier = Utc::now() - Duration::minutes(10);
        let mirrored = mirrored_status(&backup(None), &outcome(OperationResult::Created), earlier);
        let now = Utc::now();
        let status = failed_status(
            &backup(Some(mirrored)),
            &Error::not_found("VolumeSnapshotContent", "pvc-1"),
            now,
        );

        assert_eq!(status.phase.as_deref(), Some(PHASE_FAILED));
        assert_eq!(status.mirrored_snapshot.as_deref(), Some("pvc-1-clone-volumesnapshot"));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, now);
    }

    #[test]
    fn only_a_new_failure_counts_as_entering_failure() {
        let missing = Error::not_found("VolumeSnapshotContent", "pvc-1");
        let first = failed_status(&backup(None), &missing, Utc::now());
        assert!(entered_failure(None, &first));

        let repeated = failed_status(&backup(Some(first.clone())), &missing, Utc::now());
        assert!(!entered_failure(Some(&first), &repeated));

        let invalid = Error::validation("protectedNamespace must not be empty");
        let changed = failed_status(&backup(Some(first.clone())), &invalid, Utc::now());
        assert!(entered_failure(Some(&first), &changed));

        let pending = failed_status(
            &backup(None),
            &Error::SourceNotReady("pvc-1".to_string()),
            Utc::now(),
        );
        assert!(!entered_failure(None, &pending));
    }

    #[tokio::test]
    async fn report_skips_identical_status() {
        let status = mirrored_status(&backup(None), &outcome(OperationResult::Created), Utc::now());
        let mut store = MockSnapshotStore::new();
        store.expect_patch_backup_status().times(0);

        let patched = report(&store, &backup(Some(status.clone())), &status)
            .await
            .unwrap();

        assert!(!patched);
    }

    #[tokio::test]
    async fn report_patches_changed_status() {
        let status = mirrored_status(&backup(None), &outcome(OperationResult::Created), Utc::now());
        let mut store = MockSnapshotStore::new();
        store
            .expect_patch_backup_status()
            .withf(|namespace, name, status| {
                namespace == "app" && name == "br-1" && status.phase.as_deref() == Some(PHASE_COMPLETED)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let patched = report(&store, &backup(None), &status).await.unwrap();

        assert!(patched);
    }
}
