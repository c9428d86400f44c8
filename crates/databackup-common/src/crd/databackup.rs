//! DataBackup Custom Resource Definition
//!
//! A DataBackup asks the controller to snapshot the metadata of one Dataset's
//! storage runtime into a persistent volume claim or a host path.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, User};

/// Duration reported until the backup reaches a terminal phase
pub const DURATION_UNFINISHED: &str = "Unfinished";

/// Scheme for backups written into a persistent volume claim
pub const VOLUME_SCHEME: &str = "pvc://";

/// Scheme for backups written to a host-local path
pub const PATH_SCHEME: &str = "local://";

/// Lifecycle phase of a DataBackup
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupPhase {
    /// Waiting for the dataset lock
    #[default]
    Pending,
    /// Lock held, worker release installed or being installed
    Executing,
    /// Worker pod succeeded
    Complete,
    /// Conflict, unsupported path, or worker pod failed
    Failed,
}

impl BackupPhase {
    /// Complete and Failed never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Executing => write!(f, "Executing"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a DataBackup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataBackupStatus {
    /// Current phase
    #[serde(default)]
    pub phase: BackupPhase,

    /// Most recent condition; replaced, not appended, on every phase change
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Time from creation to the terminal transition, e.g. `1m30s`
    #[serde(default)]
    pub duration: String,
}

impl DataBackupStatus {
    /// Status written the first time a DataBackup is seen
    pub fn initial() -> Self {
        Self {
            phase: BackupPhase::Pending,
            conditions: vec![],
            duration: DURATION_UNFINISHED.to_string(),
        }
    }
}

/// Specification for a DataBackup
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "data.fluid.io",
    version = "v1alpha1",
    kind = "DataBackup",
    plural = "databackups",
    namespaced,
    status = "DataBackupStatus",
    printcolumn = r#"{"name":"Dataset","type":"string","jsonPath":".spec.dataset"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Path","type":"string","jsonPath":".spec.backupPath"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".status.duration"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataBackupSpec {
    /// Name of the Dataset to back up (same namespace)
    pub dataset: String,

    /// Destination, `pvc://<claim>/<subpath>` or `local://<host-path>`
    pub backup_path: String,

    /// Identity the worker runs as; overrides the runtime's runAs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<User>,
}

impl DataBackup {
    /// Lock token written into `Dataset.status.dataBackupRef`
    pub fn backup_ref(&self) -> String {
        backup_ref(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    /// Deterministic release name of the worker job
    pub fn release_name(&self) -> String {
        format!("{}-charts", self.name_any())
    }

    /// Deterministic name of the worker job's pod
    pub fn worker_pod_name(&self) -> String {
        format!("{}-pod", self.name_any())
    }

    /// Current phase, treating a missing status as Pending
    pub fn phase(&self) -> BackupPhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }
}

/// Build the lock token for a DataBackup identity
pub fn backup_ref(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Parsed backup destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupPath {
    /// Inside a persistent volume claim
    Volume {
        /// Claim name
        claim: String,
        /// Directory inside the claim, always `/`-terminated
        path: String,
    },
    /// Host-local directory, always `/`-terminated
    Local {
        /// Absolute host path
        path: String,
    },
}

impl BackupPath {
    /// Split a backup path into claim name and in-volume path
    pub fn parse(raw: &str) -> Result<Self, String> {
        if let Some(rest) = raw.strip_prefix(VOLUME_SCHEME) {
            let (claim, sub) = match rest.split_once('/') {
                Some((claim, sub)) => (claim, sub),
                None => (rest, ""),
            };
            if claim.is_empty() {
                return Err(format!("missing volume claim name in '{}'", raw));
            }
            Ok(Self::Volume {
                claim: claim.to_string(),
                path: with_trailing_slash(format!("/{}", sub)),
            })
        } else if let Some(rest) = raw.strip_prefix(PATH_SCHEME) {
            Ok(Self::Local {
                path: with_trailing_slash(rest.to_string()),
            })
        } else {
            Err(format!("unsupported backup path '{}'", raw))
        }
    }

    /// Claim name, empty for local paths
    pub fn claim(&self) -> &str {
        match self {
            Self::Volume { claim, .. } => claim,
            Self::Local { .. } => "",
        }
    }

    /// Directory the worker writes into
    pub fn path(&self) -> &str {
        match self {
            Self::Volume { path, .. } | Self::Local { path } => path,
        }
    }
}

fn with_trailing_slash(mut path: String) -> String {
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}
