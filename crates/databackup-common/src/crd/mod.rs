//! Custom Resource Definitions used by the DataBackup controller
//!
//! `DataBackup` is owned by this controller; `Dataset` and the runtime
//! resources are owned by Fluid and only partially modeled.

mod databackup;
mod dataset;
mod types;

pub use databackup::{
    backup_ref, BackupPath, BackupPhase, DataBackup, DataBackupSpec, DataBackupStatus,
    DURATION_UNFINISHED, PATH_SCHEME, VOLUME_SCHEME,
};
pub use dataset::{
    Dataset, DatasetSpec, DatasetStatus, InitUsersSpec, RuntimeBinding, RuntimeSpec,
    ACCELERATE_CATEGORY,
};
pub use types::{Condition, ConditionStatus, User, CONDITION_COMPLETE, CONDITION_FAILED};
