//! DataBackup controller implementation
//!
//! Each reconciliation reads the DataBackup and its Dataset fresh, decides
//! the next step from the current phase, and returns a requeue directive
//! instead of waiting. Nothing is remembered between invocations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use databackup_common::crd::{
    BackupPath, BackupPhase, Condition, DataBackup, DataBackupStatus, Dataset, RuntimeBinding,
    CONDITION_COMPLETE, CONDITION_FAILED,
};
use databackup_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use databackup_common::kube_utils::{has_finalizer, is_deleting, is_owned_by, owner_reference};
use databackup_common::{Error, CONTROLLER_NAME, DATABACKUP_FINALIZER};

use crate::client::{BackupClient, KubeBackupClient};
use crate::deletion;
use crate::installer::{HelmInstaller, ReleaseInstaller};
use crate::launcher::{self, LauncherConfig};
use crate::lock::{self, LockOutcome};
use crate::monitor::{self, PodOutcome};
use crate::runtime::{ExecRuntimeProbe, RuntimeKind, RuntimeProbe};

/// Requeue interval while waiting on the runtime, the lock, or the worker
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(20);
/// Requeue interval after a transient error
const REQUEUE_ERROR_SECS: u64 = 5;
/// Requeue interval after an error that needs a configuration fix
const REQUEUE_CONFIG_ERROR_SECS: u64 = 60;

const MSG_CONFLICT: &str = "Found other DataBackup that is in Executing phase";
const MSG_PATH_NOT_SUPPORTED: &str = "Only support pvc and local path now";
const MSG_BACKUP_SUCCESSFUL: &str = "Backup Pod exec successfully and finish";
const MSG_BACKUP_FAILED: &str = "Backup Pod exec failed and exit";
const MSG_RUNTIME_NOT_READY: &str = "Bounded accelerate runtime not ready";

/// Shared state for the DataBackup controller
pub struct Context {
    /// Kubernetes access (trait object for testability)
    pub client: Arc<dyn BackupClient>,
    /// Storage runtime queries
    pub probe: Arc<dyn RuntimeProbe>,
    /// Worker release installer
    pub installer: Arc<dyn ReleaseInstaller>,
    /// Kubernetes event sink
    pub events: Arc<dyn EventPublisher>,
    /// Worker job settings
    pub launcher: LauncherConfig,
}

impl Context {
    /// Production context backed by the given client and the helm binary
    pub fn new(client: Client, launcher: LauncherConfig) -> Self {
        Self {
            client: Arc::new(KubeBackupClient::new(client.clone())),
            probe: Arc::new(ExecRuntimeProbe::new(client.clone())),
            installer: Arc::new(HelmInstaller::default()),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            launcher,
        }
    }

    /// Context assembled from explicit collaborators, used by tests
    pub fn from_parts(
        client: Arc<dyn BackupClient>,
        probe: Arc<dyn RuntimeProbe>,
        installer: Arc<dyn ReleaseInstaller>,
        events: Arc<dyn EventPublisher>,
        launcher: LauncherConfig,
    ) -> Self {
        Self {
            client,
            probe,
            installer,
            events,
            launcher,
        }
    }

    async fn publish(
        &self,
        backup: &DataBackup,
        type_: EventType,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.events
            .publish(&backup.object_ref(&()), type_, reason, action, Some(note.into()))
            .await;
    }
}

fn requeue_now() -> Action {
    Action::requeue(Duration::ZERO)
}

/// Reconcile a DataBackup
///
/// Handles deletion, then makes sure the finalizer, owner reference and an
/// initial status exist, then dispatches on the phase.
#[instrument(
    skip(backup, ctx),
    fields(backup = %backup.name_any(), namespace = %backup.namespace().unwrap_or_default())
)]
pub async fn reconcile(backup: Arc<DataBackup>, ctx: Arc<Context>) -> Result<Action, Error> {
    debug!(phase = %backup.phase(), "reconciling DataBackup");

    if is_deleting(backup.as_ref()) {
        return deletion::cleanup(&backup, &ctx).await;
    }

    if !has_finalizer(backup.as_ref(), DATABACKUP_FINALIZER) {
        ctx.client.add_finalizer(&backup).await?;
        debug!("finalizer added");
        return Ok(requeue_now());
    }

    if backup.phase().is_terminal() {
        debug!("backup finished, nothing to do");
        return Ok(Action::await_change());
    }

    let namespace = backup.namespace().unwrap_or_default();
    let Some(dataset) = ctx
        .client
        .get_dataset(&namespace, &backup.spec.dataset)
        .await?
    else {
        info!(dataset = %backup.spec.dataset, "target dataset not found, waiting");
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    };

    if !is_owned_by(backup.as_ref(), &dataset) {
        if let Some(owner) = owner_reference(&dataset) {
            ctx.client.add_owner_reference(&backup, owner).await?;
            debug!("owner reference to dataset added");
            return Ok(requeue_now());
        }
    }

    if backup.status.is_none() {
        ctx.client
            .update_backup_status(&backup, &DataBackupStatus::initial())
            .await?;
        return Ok(requeue_now());
    }

    match backup.phase() {
        BackupPhase::Pending => reconcile_pending(&backup, &dataset, &ctx).await,
        BackupPhase::Executing => reconcile_executing(&backup, &dataset, &ctx).await,
        BackupPhase::Complete | BackupPhase::Failed => Ok(Action::await_change()),
    }
}

/// Error policy: requeue after a delay depending on the error
pub fn error_policy(backup: Arc<DataBackup>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_stale_write() {
        debug!(backup = %backup.name_any(), %error, "stale write, retrying from fresh state");
    } else {
        error!(?error, backup = %backup.name_any(), "reconciliation failed");
    }

    let secs = if error.is_retryable() {
        REQUEUE_ERROR_SECS
    } else {
        REQUEUE_CONFIG_ERROR_SECS
    };
    Action::requeue(Duration::from_secs(secs))
}

/// The accelerate binding and its runtime variant, or an event note
fn accelerate_runtime(dataset: &Dataset) -> Result<(&RuntimeBinding, RuntimeKind), String> {
    let binding = dataset
        .accelerate_runtime()
        .ok_or_else(|| "Bounded accelerate runtime not found".to_string())?;
    let kind = RuntimeKind::from_binding(binding).ok_or_else(|| {
        format!(
            "Bounded accelerate runtime not supported: {}",
            binding.type_
        )
    })?;
    Ok((binding, kind))
}

async fn reconcile_pending(
    backup: &DataBackup,
    dataset: &Dataset,
    ctx: &Context,
) -> Result<Action, Error> {
    let my_ref = backup.backup_ref();

    if let Some(holder) = lock::conflicting_holder(dataset, &my_ref) {
        info!(holder, "dataset locked by another DataBackup");
        return fail_pending(backup, ctx, reasons::CONFLICT_DATA_BACKUP, MSG_CONFLICT).await;
    }

    if let Err(msg) = BackupPath::parse(&backup.spec.backup_path) {
        warn!(path = %backup.spec.backup_path, %msg, "backup path not supported");
        return fail_pending(
            backup,
            ctx,
            reasons::PATH_NOT_SUPPORTED,
            MSG_PATH_NOT_SUPPORTED,
        )
        .await;
    }

    if !runtime_ready(backup, dataset, ctx).await? {
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    match lock::try_acquire(ctx.client.as_ref(), dataset, &my_ref).await? {
        LockOutcome::Conflict(holder) => {
            info!(holder, "dataset locked by another DataBackup");
            fail_pending(backup, ctx, reasons::CONFLICT_DATA_BACKUP, MSG_CONFLICT).await
        }
        LockOutcome::Contended => {
            info!("dataset changed while locking, will retry");
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        LockOutcome::Acquired => {
            let mut status = backup
                .status
                .clone()
                .unwrap_or_else(DataBackupStatus::initial);
            status.phase = BackupPhase::Executing;
            ctx.client.update_backup_status(backup, &status).await?;

            ctx.publish(
                backup,
                EventType::Normal,
                reasons::BACKUP_STARTED,
                actions::LOCK,
                format!("Locked dataset {}", backup.spec.dataset),
            )
            .await;
            info!("phase updated to Executing");
            Ok(requeue_now())
        }
    }
}

/// Whether the bound runtime can serve a backup; emits an event when not
async fn runtime_ready(
    backup: &DataBackup,
    dataset: &Dataset,
    ctx: &Context,
) -> Result<bool, Error> {
    let note = match accelerate_runtime(dataset) {
        Ok((_, kind)) => {
            let namespace = dataset.namespace().unwrap_or_default();
            if ctx
                .probe
                .is_ready(kind, &namespace, &dataset.name_any())
                .await?
            {
                return Ok(true);
            }
            MSG_RUNTIME_NOT_READY.to_string()
        }
        Err(note) => note,
    };

    debug!(dataset = %dataset.name_any(), %note, "runtime not ready");
    ctx.publish(
        backup,
        EventType::Normal,
        reasons::RUNTIME_NOT_READY,
        actions::RECONCILE,
        note,
    )
    .await;
    Ok(false)
}

/// Pending → Failed without ever touching the lock
async fn fail_pending(
    backup: &DataBackup,
    ctx: &Context,
    reason: &str,
    message: &str,
) -> Result<Action, Error> {
    let mut status = backup
        .status
        .clone()
        .unwrap_or_else(DataBackupStatus::initial);
    status.phase = BackupPhase::Failed;
    status.conditions = vec![Condition::now(CONDITION_FAILED, reason, message)];
    ctx.client.update_backup_status(backup, &status).await?;

    ctx.publish(backup, EventType::Warning, reason, actions::RECONCILE, message)
        .await;
    Ok(requeue_now())
}

async fn reconcile_executing(
    backup: &DataBackup,
    dataset: &Dataset,
    ctx: &Context,
) -> Result<Action, Error> {
    let namespace = backup.namespace().unwrap_or_default();
    let release = backup.release_name();

    if !ctx.installer.exists(&release, &namespace).await? {
        let (binding, kind) = match accelerate_runtime(dataset) {
            Ok(found) => found,
            Err(note) => {
                warn!(%note, "cannot launch worker");
                ctx.publish(
                    backup,
                    EventType::Normal,
                    reasons::RUNTIME_NOT_READY,
                    actions::LAUNCH,
                    note.clone(),
                )
                .await;
                return Err(Error::configuration(backup.backup_ref(), note));
            }
        };

        info!(release = %release, runtime = %kind, "worker release not installed yet, installing");
        if let Err(e) = launcher::launch(backup, binding, kind, ctx).await {
            if matches!(e, Error::ImageConfig { .. }) {
                ctx.publish(
                    backup,
                    EventType::Warning,
                    reasons::IMAGE_CONFIG_INVALID,
                    actions::LAUNCH,
                    e.to_string(),
                )
                .await;
            }
            return Err(e);
        }
        ctx.publish(
            backup,
            EventType::Normal,
            reasons::RELEASE_INSTALLED,
            actions::LAUNCH,
            format!("Installed release {}", release),
        )
        .await;
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    let Some(pod) = ctx
        .client
        .get_pod(&namespace, &backup.worker_pod_name())
        .await?
    else {
        debug!("worker pod not created yet");
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    };

    match monitor::inspect(&pod, Utc::now()) {
        PodOutcome::Running => {
            debug!("worker pod still running");
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        PodOutcome::Succeeded(at) => {
            let outcome = Terminal {
                phase: BackupPhase::Complete,
                condition: CONDITION_COMPLETE,
                reason: reasons::BACKUP_SUCCESSFUL,
                message: MSG_BACKUP_SUCCESSFUL,
                event: EventType::Normal,
            };
            finish(backup, ctx, outcome, at).await
        }
        PodOutcome::Failed(at) => {
            let outcome = Terminal {
                phase: BackupPhase::Failed,
                condition: CONDITION_FAILED,
                reason: reasons::BACKUP_FAILED,
                message: MSG_BACKUP_FAILED,
                event: EventType::Warning,
            };
            finish(backup, ctx, outcome, at).await
        }
    }
}

struct Terminal {
    phase: BackupPhase,
    condition: &'static str,
    reason: &'static str,
    message: &'static str,
    event: EventType,
}

/// Executing → Complete/Failed: free the dataset, then record the outcome
async fn finish(
    backup: &DataBackup,
    ctx: &Context,
    outcome: Terminal,
    finished_at: chrono::DateTime<Utc>,
) -> Result<Action, Error> {
    let namespace = backup.namespace().unwrap_or_default();
    lock::release(
        ctx.client.as_ref(),
        &namespace,
        &backup.spec.dataset,
        &backup.backup_ref(),
    )
    .await?;

    let created = backup
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or(finished_at);
    let status = DataBackupStatus {
        phase: outcome.phase,
        conditions: vec![Condition::observed(
            outcome.condition,
            outcome.reason,
            outcome.message,
            finished_at,
        )],
        duration: monitor::format_duration(monitor::elapsed(created, finished_at)),
    };
    ctx.client.update_backup_status(backup, &status).await?;

    ctx.publish(
        backup,
        outcome.event,
        outcome.reason,
        actions::RECONCILE,
        outcome.message,
    )
    .await;
    info!(phase = %status.phase, duration = %status.duration, "backup finished");
    Ok(requeue_now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use chrono::DateTime;
    use databackup_common::crd::{
        DataBackupSpec, DatasetStatus, RuntimeBinding, ACCELERATE_CATEGORY,
    };
    use databackup_common::events::NoopEventPublisher;
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use crate::client::MockBackupClient;
    use crate::installer::MockReleaseInstaller;
    use crate::runtime::MockRuntimeProbe;

    const CREATED: &str = "2024-03-01T10:00:00Z";

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn dataset_fixture(holder: &str, runtime_type: &str, master_replicas: i32) -> Dataset {
        let mut ds = Dataset::new("imagenet", Default::default());
        ds.metadata.namespace = Some("default".to_string());
        ds.metadata.uid = Some("dataset-uid".to_string());
        ds.metadata.resource_version = Some("100".to_string());
        ds.status = Some(DatasetStatus {
            data_backup_ref: holder.to_string(),
            runtimes: vec![RuntimeBinding {
                name: "imagenet".to_string(),
                namespace: "default".to_string(),
                category: ACCELERATE_CATEGORY.to_string(),
                type_: runtime_type.to_string(),
                master_replicas: Some(master_replicas),
            }],
            ..Default::default()
        });
        ds
    }

    fn dataset(holder: &str) -> Dataset {
        dataset_fixture(holder, "alluxio", 1)
    }

    /// A DataBackup that already went through finalizer/owner/status setup
    fn backup(phase: BackupPhase, path: &str) -> DataBackup {
        let mut b = DataBackup::new(
            "nightly",
            DataBackupSpec {
                dataset: "imagenet".to_string(),
                backup_path: path.to_string(),
                run_as: None,
            },
        );
        b.metadata.namespace = Some("default".to_string());
        b.metadata.resource_version = Some("7".to_string());
        b.metadata.creation_timestamp = Some(Time(at(CREATED)));
        b.metadata.finalizers = Some(vec![DATABACKUP_FINALIZER.to_string()]);
        b.metadata.owner_references = owner_reference(&dataset("")).map(|o| vec![o]);
        b.status = Some(DataBackupStatus {
            phase,
            ..DataBackupStatus::initial()
        });
        b
    }

    fn worker_pod(phase: &str, transitioned: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: transitioned.map(|t| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: "False".to_string(),
                        last_transition_time: Some(Time(at(t))),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn master_pod() -> Pod {
        Pod {
            spec: Some(PodSpec {
                node_name: Some("node-1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                host_ip: Some("10.0.0.7".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Records every status the controller writes
    #[derive(Clone, Default)]
    struct StatusCapture(Arc<Mutex<Vec<DataBackupStatus>>>);

    impl StatusCapture {
        fn install(&self, client: &mut MockBackupClient) {
            let writes = self.0.clone();
            client
                .expect_update_backup_status()
                .returning(move |_, status| {
                    writes.lock().unwrap().push(status.clone());
                    Ok(())
                });
        }

        fn last(&self) -> DataBackupStatus {
            self.0.lock().unwrap().last().cloned().expect("a status write")
        }

        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn context(
        client: MockBackupClient,
        probe: MockRuntimeProbe,
        installer: MockReleaseInstaller,
    ) -> Arc<Context> {
        Arc::new(Context::from_parts(
            Arc::new(client),
            Arc::new(probe),
            Arc::new(installer),
            Arc::new(NoopEventPublisher),
            LauncherConfig::default(),
        ))
    }

    fn ready_probe() -> MockRuntimeProbe {
        let mut probe = MockRuntimeProbe::new();
        probe.expect_is_ready().returning(|_, _, _| Ok(true));
        probe
    }

    fn returning_dataset(client: &mut MockBackupClient, ds: Dataset) {
        client
            .expect_get_dataset()
            .returning(move |_, _| Ok(Some(ds.clone())));
    }

    // =========================================================================
    // Setup before phase dispatch
    // =========================================================================

    #[tokio::test]
    async fn new_backup_gets_finalizer_first() {
        let mut b = backup(BackupPhase::Pending, "pvc://claim/sub");
        b.metadata.finalizers = None;
        b.status = None;

        let mut client = MockBackupClient::new();
        client.expect_add_finalizer().times(1).returning(|_| Ok(()));
        client.expect_get_dataset().never();

        let ctx = context(client, MockRuntimeProbe::new(), MockReleaseInstaller::new());
        let action = reconcile(Arc::new(b), ctx).await.unwrap();
        assert_eq!(action, requeue_now());
    }

    #[tokio::test]
    async fn missing_dataset_waits_without_writes() {
        let mut client = MockBackupClient::new();
        client.expect_get_dataset().returning(|_, _| Ok(None));
        client.expect_update_backup_status().never();

        let ctx = context(client, MockRuntimeProbe::new(), MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://c/")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn backup_is_owned_by_its_dataset() {
        let mut b = backup(BackupPhase::Pending, "pvc://claim/sub");
        b.metadata.owner_references = None;

        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        client
            .expect_add_owner_reference()
            .withf(|_, owner| owner.kind == "Dataset" && owner.uid == "dataset-uid")
            .times(1)
            .returning(|_, _| Ok(()));

        let ctx = context(client, MockRuntimeProbe::new(), MockReleaseInstaller::new());
        reconcile(Arc::new(b), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn first_status_is_pending_and_unfinished() {
        let mut b = backup(BackupPhase::Pending, "pvc://claim/sub");
        b.status = None;

        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let ctx = context(client, MockRuntimeProbe::new(), MockReleaseInstaller::new());
        reconcile(Arc::new(b), ctx).await.unwrap();
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.last(), DataBackupStatus::initial());
    }

    // =========================================================================
    // Pending
    // =========================================================================

    /// Story: R1 (pvc path) targets an unlocked dataset with a ready runtime;
    /// one pass locks the dataset and moves R1 to Executing.
    #[tokio::test]
    async fn story_pending_backup_acquires_lock_and_executes() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        client
            .expect_write_dataset_lock()
            .withf(|ds, r| ds.resource_version().as_deref() == Some("100") && r == "default/nightly")
            .times(1)
            .returning(|_, _| Ok(()));
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let ctx = context(client, ready_probe(), MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://claim/sub")), ctx)
            .await
            .unwrap();

        assert_eq!(action, requeue_now());
        assert_eq!(capture.last().phase, BackupPhase::Executing);
        assert_eq!(capture.last().duration, "Unfinished");
    }

    /// Story: R2 arrives while R1 holds the dataset; R2 fails on its first
    /// pass and the dataset is not written.
    #[tokio::test]
    async fn story_conflicting_backup_fails_without_touching_dataset() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/r1"));
        client.expect_write_dataset_lock().never();
        client.expect_clear_dataset_lock().never();
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let mut probe = MockRuntimeProbe::new();
        probe.expect_is_ready().never();

        let ctx = context(client, probe, MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://claim/sub")), ctx)
            .await
            .unwrap();

        assert_eq!(action, requeue_now());
        let status = capture.last();
        assert_eq!(status.phase, BackupPhase::Failed);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, CONDITION_FAILED);
        assert_eq!(status.conditions[0].reason, "conflictDataBackupRef");
        assert_eq!(status.conditions[0].message, MSG_CONFLICT);
    }

    #[tokio::test]
    async fn unsupported_path_fails_without_locking() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        client.expect_write_dataset_lock().never();
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let ctx = context(client, ready_probe(), MockReleaseInstaller::new());
        reconcile(Arc::new(backup(BackupPhase::Pending, "s3://bucket/key")), ctx)
            .await
            .unwrap();

        let status = capture.last();
        assert_eq!(status.phase, BackupPhase::Failed);
        assert_eq!(status.conditions[0].reason, "PathNotSupported");
        assert_eq!(status.conditions[0].message, MSG_PATH_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn runtime_not_ready_stalls_pending() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        client.expect_write_dataset_lock().never();
        client.expect_update_backup_status().never();

        let mut probe = MockRuntimeProbe::new();
        probe
            .expect_is_ready()
            .withf(|kind, ns, ds| *kind == RuntimeKind::Alluxio && ns == "default" && ds == "imagenet")
            .returning(|_, _, _| Ok(false));

        let ctx = context(client, probe, MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "local:///backup")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn unsupported_runtime_type_stalls_without_probing() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset_fixture("", "jindo", 1));
        client.expect_update_backup_status().never();

        let mut probe = MockRuntimeProbe::new();
        probe.expect_is_ready().never();

        let ctx = context(client, probe, MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://claim/")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn lost_lock_race_retries_without_advancing() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset(""));
        client
            .expect_write_dataset_lock()
            .returning(|_, _| Err(Error::stale_write("Dataset", "default/imagenet")));
        client.expect_update_backup_status().never();

        let ctx = context(client, ready_probe(), MockReleaseInstaller::new());
        let action = reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://claim/")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn lock_already_ours_advances_without_rewriting_it() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client.expect_write_dataset_lock().never();
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let ctx = context(client, ready_probe(), MockReleaseInstaller::new());
        reconcile(Arc::new(backup(BackupPhase::Pending, "pvc://claim/")), ctx)
            .await
            .unwrap();
        assert_eq!(capture.last().phase, BackupPhase::Executing);
    }

    // =========================================================================
    // Executing
    // =========================================================================

    /// Story: R1 is Executing and no release exists; the worker config is
    /// derived from the master pod and the chart installed, phase unchanged.
    #[tokio::test]
    async fn story_executing_installs_release_once() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client
            .expect_get_pod()
            .withf(|ns, name| ns == "default" && name == "imagenet-master-0")
            .times(1)
            .returning(|_, _| Ok(Some(master_pod())));
        client
            .expect_get_config_map()
            .withf(|_, name| name == "imagenet-alluxio-values")
            .returning(|_, _| Ok(None));
        client
            .expect_get_runtime_spec()
            .returning(|_, _, _| Ok(None));
        client.expect_update_backup_status().never();

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(false));
        installer
            .expect_install()
            .withf(|release, ns, values: &Path, chart: &Path| {
                release == "nightly-charts"
                    && ns == "default"
                    && values.exists()
                    && chart == Path::new("/charts/fluid-databackup/alluxio")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        let action = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/sub")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn multi_master_runtime_asks_for_the_leader() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset_fixture("default/nightly", "goosefs", 3));
        client
            .expect_get_pod()
            .withf(|_, name| name == "imagenet-master-2")
            .times(1)
            .returning(|_, _| Ok(Some(master_pod())));
        client.expect_get_config_map().returning(|_, _| Ok(None));
        client
            .expect_get_runtime_spec()
            .withf(|kind, _, _| *kind == RuntimeKind::GooseFs)
            .returning(|_, _, _| Ok(None));

        let mut probe = MockRuntimeProbe::new();
        probe
            .expect_leader_master()
            .times(1)
            .returning(|_, _, _| Ok("imagenet-master-2".to_string()));

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(false));
        installer
            .expect_install()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let ctx = context(client, probe, installer);
        reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/sub")), ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_master_pod_is_an_error() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client.expect_get_pod().returning(|_, _| Ok(None));

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(false));
        installer.expect_install().never();

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        let err = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Runtime { .. }));
    }

    #[tokio::test]
    async fn executing_without_binding_is_a_configuration_error() {
        let mut ds = dataset("default/nightly");
        if let Some(status) = ds.status.as_mut() {
            status.runtimes.clear();
        }
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, ds);

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(false));
        installer.expect_install().never();

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        let err = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    /// Story: the worker pod succeeded 90s after the backup was created; the
    /// lock is released and the backup completes with its duration.
    #[tokio::test]
    async fn story_worker_success_completes_backup() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client
            .expect_get_pod()
            .withf(|_, name| name == "nightly-pod")
            .returning(|_, _| Ok(Some(worker_pod("Succeeded", Some("2024-03-01T10:01:30Z")))));
        client
            .expect_clear_dataset_lock()
            .times(1)
            .returning(|_, _| Ok(()));
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(true));
        installer.expect_install().never();

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        let action = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
            .await
            .unwrap();

        assert_eq!(action, requeue_now());
        let status = capture.last();
        assert_eq!(status.phase, BackupPhase::Complete);
        assert_eq!(status.duration, "1m30s");
        assert_eq!(status.conditions[0].type_, CONDITION_COMPLETE);
        assert_eq!(status.conditions[0].reason, "BackupSuccessful");
        assert_eq!(
            status.conditions[0].last_transition_time,
            at("2024-03-01T10:01:30Z")
        );
    }

    #[tokio::test]
    async fn worker_failure_fails_backup() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client
            .expect_get_pod()
            .returning(|_, _| Ok(Some(worker_pod("Failed", Some("2024-03-01T10:00:45Z")))));
        client.expect_clear_dataset_lock().returning(|_, _| Ok(()));
        let capture = StatusCapture::default();
        capture.install(&mut client);

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(true));

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
            .await
            .unwrap();

        let status = capture.last();
        assert_eq!(status.phase, BackupPhase::Failed);
        assert_eq!(status.duration, "45s");
        assert_eq!(status.conditions[0].reason, "BackupFailed");
        assert_eq!(status.conditions[0].message, MSG_BACKUP_FAILED);
    }

    #[tokio::test]
    async fn unlock_failure_leaves_backup_executing() {
        let mut client = MockBackupClient::new();
        returning_dataset(&mut client, dataset("default/nightly"));
        client
            .expect_get_pod()
            .returning(|_, _| Ok(Some(worker_pod("Succeeded", Some("2024-03-01T10:01:30Z")))));
        client
            .expect_clear_dataset_lock()
            .times(1)
            .returning(|_, _| Err(Error::internal("connection reset")));
        client.expect_update_backup_status().never();

        let mut installer = MockReleaseInstaller::new();
        installer.expect_exists().returning(|_, _| Ok(true));

        let ctx = context(client, MockRuntimeProbe::new(), installer);
        let err = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn running_or_missing_worker_pod_stalls() {
        for pod in [Some(worker_pod("Running", None)), None] {
            let mut client = MockBackupClient::new();
            returning_dataset(&mut client, dataset("default/nightly"));
            client
                .expect_get_pod()
                .returning(move |_, _| Ok(pod.clone()));
            client.expect_update_backup_status().never();

            let mut installer = MockReleaseInstaller::new();
            installer.expect_exists().returning(|_, _| Ok(true));

            let ctx = context(client, MockRuntimeProbe::new(), installer);
            let action = reconcile(Arc::new(backup(BackupPhase::Executing, "pvc://claim/")), ctx)
                .await
                .unwrap();
            assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
        }
    }

    // =========================================================================
    // Terminal phases and error policy
    // =========================================================================

    #[tokio::test]
    async fn terminal_backups_are_left_alone() {
        for phase in [BackupPhase::Complete, BackupPhase::Failed] {
            let mut client = MockBackupClient::new();
            client.expect_get_dataset().never();
            client.expect_update_backup_status().never();
            client.expect_write_dataset_lock().never();
            client.expect_clear_dataset_lock().never();
            let mut installer = MockReleaseInstaller::new();
            installer.expect_exists().never();

            let ctx = context(client, MockRuntimeProbe::new(), installer);
            let action = reconcile(Arc::new(backup(phase, "pvc://claim/")), ctx)
                .await
                .unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    #[test]
    fn error_policy_backs_off_by_error_kind() {
        let ctx = context(
            MockBackupClient::new(),
            MockRuntimeProbe::new(),
            MockReleaseInstaller::new(),
        );
        let b = Arc::new(backup(BackupPhase::Executing, "pvc://claim/"));

        let action = error_policy(b.clone(), &Error::stale_write("DataBackup", "x"), ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));

        let action = error_policy(b, &Error::configuration("default/nightly", "no runtime"), ctx);
        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(REQUEUE_CONFIG_ERROR_SECS))
        );
    }
}
