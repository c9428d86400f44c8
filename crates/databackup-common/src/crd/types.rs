//! Shared status and identity types used by the DataBackup and runtime CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition type recorded when the backup finished successfully
pub const CONDITION_COMPLETE: &str = "Complete";

/// Condition type recorded when the backup failed
pub const CONDITION_FAILED: &str = "Failed";

/// Kubernetes-style condition for DataBackup status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Complete, Failed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition was probed
    pub last_probe_time: DateTime<Utc>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a `True` condition probed now that transitioned at `transitioned`
    pub fn observed(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
        transitioned: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            reason: reason.into(),
            message: message.into(),
            last_probe_time: Utc::now(),
            last_transition_time: transitioned,
        }
    }

    /// Create a `True` condition that transitioned now
    pub fn now(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::observed(type_, reason, message, Utc::now())
    }
}

/// POSIX identity a backup worker (or a runtime) runs as
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID
    pub uid: i64,

    /// User name
    #[serde(default, rename = "user")]
    pub user_name: String,

    /// Group ID
    pub gid: i64,

    /// Group name
    #[serde(default, rename = "group")]
    pub group_name: String,
}

impl User {
    /// Encoding consumed by the init-users container: `uid:user:gid,gid:group`
    pub fn init_users_env(&self) -> String {
        format!(
            "{}:{}:{},{}:{}",
            self.uid, self.user_name, self.gid, self.gid, self.group_name
        )
    }
}
