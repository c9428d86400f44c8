//! Kubernetes Event recording for the DataBackup controller.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given resource.
    ///
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller was doing (see [`actions`])
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Bound accelerate runtime is missing, unsupported, or not ready
    pub const RUNTIME_NOT_READY: &str = "RuntimeNotReady";
    /// Another DataBackup holds the dataset lock
    pub const CONFLICT_DATA_BACKUP: &str = "conflictDataBackupRef";
    /// Backup path scheme is not pvc:// or local://
    pub const PATH_NOT_SUPPORTED: &str = "PathNotSupported";
    /// Dataset lock acquired, backup is executing
    pub const BACKUP_STARTED: &str = "BackupStarted";
    /// Worker release installed
    pub const RELEASE_INSTALLED: &str = "ReleaseInstalled";
    /// Worker pod succeeded
    pub const BACKUP_SUCCESSFUL: &str = "BackupSuccessful";
    /// Worker pod failed
    pub const BACKUP_FAILED: &str = "BackupFailed";
    /// Worker image could not be resolved
    pub const IMAGE_CONFIG_INVALID: &str = "ImageConfigInvalid";
    /// Dataset lock cleared during deletion
    pub const LOCK_RELEASED: &str = "LockReleased";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Acquiring the dataset lock
    pub const LOCK: &str = "Lock";
    /// Installing the worker release
    pub const LAUNCH: &str = "Launch";
    /// Deleting the backup's resources
    pub const DELETE: &str = "Delete";
}
