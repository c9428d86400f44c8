//! Worker job configuration and installation
//!
//! [`derive_config`] is pure: it turns a DataBackup, the active master's
//! address and whatever the runtime publishes into the chart values.
//! [`launch`] gathers those inputs from the cluster, writes the values to a
//! temporary file and installs the release.

pub mod image;
pub mod values;

use std::path::PathBuf;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use databackup_common::crd::{BackupPath, DataBackup, RuntimeBinding, RuntimeSpec, User};
use databackup_common::Error;

use crate::controller::Context;
use crate::runtime::{master_pod_name, RuntimeKind};

use image::{resolve_init_image, resolve_worker_image, ValuesImage, DEFAULT_INIT_IMAGE};
use values::{BackupValues, InitUsersValues, UserInfo, WorkerValues};

/// Default working directory of the worker job
pub const DEFAULT_WORKDIR: &str = "/tmp";

/// Directory under the charts root holding the per-runtime backup charts
pub const DATABACKUP_CHART: &str = "fluid-databackup";

/// Name of the master container port the runtime client connects to
const RPC_PORT_NAME: &str = "rpc";

/// Operator-level settings for worker jobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Working directory passed to the worker
    pub workdir: String,
    /// Root directory of the installed charts
    pub charts_dir: PathBuf,
    /// `repo:tag` override for Alluxio workers
    pub alluxio_image: Option<String>,
    /// `repo:tag` override for GooseFS workers
    pub goosefs_image: Option<String>,
    /// `repo:tag` override for the init-users container
    pub init_image: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            workdir: DEFAULT_WORKDIR.to_string(),
            charts_dir: PathBuf::from("/charts"),
            alluxio_image: None,
            goosefs_image: None,
            init_image: None,
        }
    }
}

impl LauncherConfig {
    /// Worker image override for a runtime
    pub fn image_override(&self, kind: RuntimeKind) -> Option<&str> {
        match kind {
            RuntimeKind::Alluxio => self.alluxio_image.as_deref(),
            RuntimeKind::GooseFs => self.goosefs_image.as_deref(),
        }
        .filter(|s| !s.is_empty())
    }

    /// Chart installed for a runtime
    pub fn chart_path(&self, kind: RuntimeKind) -> PathBuf {
        self.charts_dir.join(DATABACKUP_CHART).join(kind.as_str())
    }
}

/// Where the active master runs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterAddress {
    /// Node hosting the master pod
    pub node_name: String,
    /// Host IP of that node
    pub host_ip: String,
    /// Container port named `rpc`, 0 if absent
    pub rpc_port: i32,
}

impl MasterAddress {
    /// Read node, host IP and rpc port from a master pod
    pub fn from_pod(pod: &Pod) -> Self {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        let host_ip = pod
            .status
            .as_ref()
            .and_then(|s| s.host_ip.clone())
            .unwrap_or_default();
        let rpc_port = pod
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .flat_map(|c| c.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(RPC_PORT_NAME))
            .map(|p| p.container_port)
            .unwrap_or_default();

        Self {
            node_name,
            host_ip,
            rpc_port,
        }
    }
}

/// Everything [`derive_config`] reads from the cluster
#[derive(Clone, Debug, Default)]
pub struct RuntimeInputs {
    /// Image the runtime's own workers run, if published
    pub values_image: Option<ValuesImage>,
    /// Spec of the runtime resource, if it exists
    pub runtime_spec: Option<RuntimeSpec>,
}

/// Directory the init-users container writes passwd/group files into
pub fn backup_user_dir(namespace: &str, name: &str) -> String {
    format!("/tmp/backupuser/{}/{}", namespace, name)
}

/// Build the chart values for a backup
pub fn derive_config(
    backup: &DataBackup,
    kind: RuntimeKind,
    master: &MasterAddress,
    inputs: &RuntimeInputs,
    config: &LauncherConfig,
) -> Result<WorkerValues, Error> {
    let namespace = backup.namespace().unwrap_or_default();
    let name = backup.name_any();

    let worker_image = resolve_worker_image(
        inputs.values_image.as_ref(),
        config.image_override(kind),
        kind.default_image(),
    )?;

    let path = BackupPath::parse(&backup.spec.backup_path)
        .map_err(|msg| Error::configuration(backup.backup_ref(), msg))?;

    let run_as: Option<&User> = backup
        .spec
        .run_as
        .as_ref()
        .or_else(|| inputs.runtime_spec.as_ref()?.run_as.as_ref());

    let init_image = resolve_init_image(
        inputs.runtime_spec.as_ref().map(|s| &s.init_users),
        config.init_image.as_deref().filter(|s| !s.is_empty()),
        DEFAULT_INIT_IMAGE,
    )?;

    let (user_info, mut init_users) = match run_as {
        Some(user) => (
            UserInfo {
                user: user.uid,
                group: user.gid,
                fs_group: 0,
            },
            InitUsersValues {
                enabled: true,
                env_users: user.init_users_env(),
                dir: backup_user_dir(&namespace, &name),
                ..Default::default()
            },
        ),
        None => (UserInfo::default(), InitUsersValues::default()),
    };
    init_users.image = init_image.image.repository;
    init_users.image_tag = init_image.image.tag;
    init_users.image_pull_policy = init_image.pull_policy;

    Ok(WorkerValues {
        data_backup: BackupValues {
            namespace,
            dataset: backup.spec.dataset.clone(),
            name,
            node_name: master.node_name.clone(),
            image: worker_image.to_string(),
            java_env: kind.client_env(&master.host_ip, master.rpc_port),
            workdir: config.workdir.clone(),
            pvc_name: path.claim().to_string(),
            path: path.path().to_string(),
            runtime_type: kind.as_str().to_string(),
        },
        user_info,
        init_users,
    })
}

/// Resolve the active master, derive the values and install the release
pub async fn launch(
    backup: &DataBackup,
    binding: &RuntimeBinding,
    kind: RuntimeKind,
    ctx: &Context,
) -> Result<(), Error> {
    let namespace = backup.namespace().unwrap_or_default();
    let dataset = &backup.spec.dataset;

    let master_pod = if binding.is_multi_master() {
        ctx.probe.leader_master(kind, &namespace, dataset).await?
    } else {
        master_pod_name(dataset)
    };
    let pod = ctx
        .client
        .get_pod(&namespace, &master_pod)
        .await?
        .ok_or_else(|| {
            Error::runtime(
                dataset.as_str(),
                kind.as_str(),
                format!("master pod {} not found", master_pod),
            )
        })?;
    let master = MasterAddress::from_pod(&pod);
    debug!(master = %master_pod, node = %master.node_name, "resolved active master");

    let values_image = ctx
        .client
        .get_config_map(&namespace, &kind.values_config_map(dataset))
        .await?
        .as_ref()
        .and_then(ValuesImage::from_config_map);
    let runtime_spec = ctx
        .client
        .get_runtime_spec(kind, &namespace, dataset)
        .await?;
    let inputs = RuntimeInputs {
        values_image,
        runtime_spec,
    };

    let values = derive_config(backup, kind, &master, &inputs, &ctx.launcher)?;
    let file = values.write_temp()?;
    let release = backup.release_name();
    ctx.installer
        .install(
            &release,
            &namespace,
            file.path(),
            &ctx.launcher.chart_path(kind),
        )
        .await?;

    info!(release = %release, image = %values.data_backup.image, "worker release installed");
    Ok(())
}
