//! Dataset and storage runtime resources owned by Fluid
//!
//! Only the fields the backup controller reads or writes are modeled; every
//! other field round-trips through the flattened maps so a status write never
//! drops data another controller owns.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::User;

/// Category of the runtime binding that serves a dataset's data
pub const ACCELERATE_CATEGORY: &str = "Accelerate";

/// Specification of a Dataset; opaque to this controller
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "data.fluid.io",
    version = "v1alpha1",
    kind = "Dataset",
    plural = "datasets",
    namespaced,
    status = "DatasetStatus",
    schema = "disabled"
)]
pub struct DatasetSpec {
    /// Fields owned by Fluid
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Status of a Dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatus {
    /// Storage runtimes bound to the dataset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtimes: Vec<RuntimeBinding>,

    /// Lock token of the DataBackup currently executing, empty when unlocked
    #[serde(default)]
    pub data_backup_ref: String,

    /// Dataset phase as reported by Fluid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Status fields owned by Fluid
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// A storage runtime bound to a dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeBinding {
    /// Runtime resource name
    pub name: String,

    /// Runtime resource namespace
    #[serde(default)]
    pub namespace: String,

    /// Binding category, e.g. `Accelerate`
    #[serde(default)]
    pub category: String,

    /// Runtime type, e.g. `alluxio` or `goosefs`
    #[serde(default, rename = "type")]
    pub type_: String,

    /// Number of master replicas, absent or zero means one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_replicas: Option<i32>,
}

impl RuntimeBinding {
    /// Whether the runtime runs more than one master and needs leader lookup
    pub fn is_multi_master(&self) -> bool {
        self.master_replicas.unwrap_or(0) > 1
    }
}

impl Dataset {
    /// The binding that backups act on
    pub fn accelerate_runtime(&self) -> Option<&RuntimeBinding> {
        self.status
            .as_ref()?
            .runtimes
            .iter()
            .find(|rt| rt.category == ACCELERATE_CATEGORY)
    }

    /// Current lock holder, `None` when unlocked
    pub fn lock_holder(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.data_backup_ref.as_str())
            .filter(|r| !r.is_empty())
    }
}

/// Fields read from an AlluxioRuntime or GooseFSRuntime spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    /// Identity the runtime's processes run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<User>,

    /// Image used by the init-users container
    #[serde(default)]
    pub init_users: InitUsersSpec,
}

/// Init-users image override on a runtime
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitUsersSpec {
    /// Image repository
    #[serde(default)]
    pub image: String,

    /// Image tag
    #[serde(default)]
    pub image_tag: String,

    /// Pull policy
    #[serde(default)]
    pub image_pull_policy: String,
}
