//! Values document consumed by the fluid-databackup chart

use std::io::Write;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use databackup_common::Error;

/// Root of the values document
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerValues {
    /// Backup job parameters
    pub data_backup: BackupValues,

    /// Identity the worker runs as
    #[serde(flatten)]
    pub user_info: UserInfo,

    /// Init-users container
    pub init_users: InitUsersValues,
}

/// Backup job parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupValues {
    /// Namespace of the DataBackup
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Dataset being backed up
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dataset: String,
    /// Name of the DataBackup, also the worker pod prefix
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Node of the active master; the worker is pinned next to it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    /// Worker image, `repo:tag`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// JVM options pointing the runtime client at the master
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub java_env: String,
    /// Working directory inside the worker
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workdir: String,
    /// Claim receiving the backup, empty for local paths
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pvc_name: String,
    /// Directory the backup is written to, `/`-terminated
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Runtime type, selects the CLI inside the worker
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_type: String,
}

/// Run-as identity; all zero means root
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// uid the worker runs as
    pub user: i64,
    /// gid the worker runs as
    pub group: i64,
    /// fsGroup of the worker pod
    pub fs_group: i64,
}

/// Init-users container values
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitUsersValues {
    /// Image repository
    pub image: String,
    /// Image tag
    pub image_tag: String,
    /// Pull policy
    pub image_pull_policy: String,
    /// Whether the init-users container runs at all
    pub enabled: bool,
    /// `uid:user:gid,gid:group`
    pub env_users: String,
    /// Host directory receiving the generated passwd and group files
    pub dir: String,
}

impl WorkerValues {
    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Write the document to a temporary file that lives as long as the handle
    pub fn write_temp(&self) -> Result<NamedTempFile, Error> {
        let prefix = format!(
            "{}-{}-{}-backuper-values-",
            self.data_backup.namespace, self.data_backup.name, self.data_backup.runtime_type
        );
        let io_err = |e: std::io::Error| Error::internal_with_context("values-file", e.to_string());

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".yaml")
            .tempfile()
            .map_err(io_err)?;
        file.write_all(self.to_yaml()?.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(file)
    }
}
