//! VolumeSnapshotBackup controller
//!
//! Watches VolumeSnapshotBackup resources and mirrors their snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        events::EventType,
        watcher::Config as WatcherConfig,
    },
    Api, Client, Resource, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::controllers::Context;
use crate::crd::VolumeSnapshotBackup;
use crate::error::{Error, Result};
use crate::events::{actions, reasons};
use crate::metrics;
use crate::reconcilers::mirror::{self, BackupRequestKey};
use crate::reconcilers::status;

const KIND: &str = "VolumeSnapshotBackup";

/// Run the VolumeSnapshotBackup controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<VolumeSnapshotBackup> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("VolumeSnapshotBackup CRD not installed: {}", e);
        return;
    }

    info!(naming = %context.config.naming, "Starting VolumeSnapshotBackup controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled VolumeSnapshotBackup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                }
            }
        })
        .await;
}

/// Main reconciliation function
///
/// Mirrors the snapshot, then reflects the outcome on the backup request's
/// status. A failed status patch after a successful mirror fails the
/// reconciliation so it is retried.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile(obj: Arc<VolumeSnapshotBackup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let key = BackupRequestKey::from_resource(&obj)?;
    info!(
        request = %key,
        generation = obj.metadata.generation.unwrap_or(0),
        "Reconciling VolumeSnapshotBackup"
    );

    let result = mirror::mirror_volume_snapshot(
        ctx.store.as_ref(),
        ctx.events.as_ref(),
        ctx.config.naming,
        &key,
    )
    .await;

    match result {
        Ok(outcome) => {
            let desired = status::mirrored_status(&obj, &outcome, Utc::now());
            status::report(ctx.store.as_ref(), &obj, &desired).await?;
            Ok(Action::requeue(ctx.config.requeue_success))
        }
        Err(e) => {
            metrics::RECONCILIATION_ERRORS
                .with_label_values(&[KIND, e.class()])
                .inc();
            report_failure(&obj, &ctx, &e).await;
            Err(e)
        }
    }
}

/// Best-effort status and Event for a failed mirror
///
/// The original error is what the controller acts on, so failures here are
/// only logged.
async fn report_failure(obj: &VolumeSnapshotBackup, ctx: &Context, err: &Error) {
    if matches!(err, Error::NotFound { kind: KIND, .. }) {
        // The request itself is gone; there is nothing to report on.
        return;
    }

    let desired = status::failed_status(obj, err, Utc::now());
    if let Err(status_err) = status::report(ctx.store.as_ref(), obj, &desired).await {
        warn!(error = %status_err, "Failed to update VolumeSnapshotBackup status");
    }

    // Warn once per distinct failure, not on every requeue.
    if !err.is_retryable() && status::entered_failure(obj.status.as_ref(), &desired) {
        ctx.events
            .publish(
                &obj.object_ref(&()),
                EventType::Warning,
                reasons::MIRROR_FAILED,
                actions::RECONCILE,
                Some(err.to_string()),
            )
            .await;
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<VolumeSnapshotBackup>, error: &Error, ctx: Arc<Context>) -> Action {
    let requeue = error_policy_for(error, &ctx.config);
    warn!(
        name = %obj.name_any(),
        error = %error,
        requeue_secs = requeue.as_secs(),
        "Reconciliation failed, scheduling retry"
    );
    Action::requeue(requeue)
}

/// Requeue delay for a failed reconciliation, by error kind
pub fn error_policy_for(error: &Error, config: &OperatorConfig) -> Duration {
    match error {
        Error::SourceNotReady(_) => Duration::from_secs(10),
        Error::NotFound { .. } => Duration::from_secs(60),
        Error::Config(_) | Error::Validation(_) => Duration::from_secs(300),
        Error::Unavailable(_)
        | Error::UpsertConflict { .. }
        | Error::Kube(_)
        | Error::Serialization(_) => config.requeue_error,
    }
}
