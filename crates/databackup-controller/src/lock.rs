//! Dataset-level mutual exclusion
//!
//! The lock is `Dataset.status.dataBackupRef`. Conflict is decided from its
//! content before any write; the write itself is conditional on the dataset's
//! resourceVersion, so of two racing acquirers exactly one succeeds.

use tracing::{debug, info};

use databackup_common::crd::Dataset;
use databackup_common::Error;

use crate::client::BackupClient;

/// Result of an acquisition attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    /// The dataset's lock now names the requester
    Acquired,
    /// Another DataBackup holds the lock
    Conflict(String),
    /// The dataset changed under us; retry from a fresh read
    Contended,
}

/// The current holder if it is someone other than `requester`
pub fn conflicting_holder<'a>(dataset: &'a Dataset, requester: &str) -> Option<&'a str> {
    dataset.lock_holder().filter(|holder| *holder != requester)
}

/// Try to make `requester` the dataset's lock holder
pub async fn try_acquire(
    client: &dyn BackupClient,
    dataset: &Dataset,
    requester: &str,
) -> Result<LockOutcome, Error> {
    if let Some(holder) = conflicting_holder(dataset, requester) {
        return Ok(LockOutcome::Conflict(holder.to_string()));
    }
    if dataset.lock_holder() == Some(requester) {
        debug!(requester, "dataset lock already held");
        return Ok(LockOutcome::Acquired);
    }

    match client.write_dataset_lock(dataset, requester).await {
        Ok(()) => {
            info!(requester, "dataset lock acquired");
            Ok(LockOutcome::Acquired)
        }
        Err(e) if e.is_stale_write() => {
            debug!(requester, error = %e, "lock write lost a race");
            Ok(LockOutcome::Contended)
        }
        Err(e) => Err(e),
    }
}

/// Clear the lock if `requester` holds it
///
/// A missing dataset or a different holder is not an error. Returns whether
/// the lock was cleared.
pub async fn release(
    client: &dyn BackupClient,
    namespace: &str,
    dataset: &str,
    requester: &str,
) -> Result<bool, Error> {
    let Some(current) = client.get_dataset(namespace, dataset).await? else {
        return Ok(false);
    };
    if current.lock_holder() != Some(requester) {
        debug!(
            requester,
            holder = current.lock_holder().unwrap_or_default(),
            "lock not held by requester"
        );
        return Ok(false);
    }

    client.clear_dataset_lock(namespace, dataset).await?;
    info!(requester, dataset, "dataset lock released");
    Ok(true)
}
