//! Cleanup of a DataBackup marked for deletion
//!
//! Steps run in order and each is safe to repeat: uninstall the worker
//! release, release the dataset lock if we hold it, drop the finalizer. Any
//! failure aborts this pass and the whole sequence reruns on the next one.

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use databackup_common::crd::DataBackup;
use databackup_common::events::{actions, reasons};
use databackup_common::kube_utils::has_finalizer;
use databackup_common::{Error, DATABACKUP_FINALIZER};

use crate::controller::Context;
use crate::lock;

/// Run the cleanup sequence for a deleting DataBackup
pub async fn cleanup(backup: &DataBackup, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(backup, DATABACKUP_FINALIZER) {
        debug!("finalizer already removed");
        return Ok(Action::await_change());
    }

    let namespace = backup.namespace().unwrap_or_default();
    let release = backup.release_name();

    ctx.installer.uninstall(&release, &namespace).await?;

    let released = lock::release(
        ctx.client.as_ref(),
        &namespace,
        &backup.spec.dataset,
        &backup.backup_ref(),
    )
    .await?;
    if released {
        ctx.events
            .publish(
                &backup.object_ref(&()),
                EventType::Normal,
                reasons::LOCK_RELEASED,
                actions::DELETE,
                Some(format!("Released lock on dataset {}", backup.spec.dataset)),
            )
            .await;
    }

    ctx.client.remove_finalizer(backup).await?;
    info!(release = %release, "cleanup finished, finalizer removed");

    Ok(Action::await_change())
}
