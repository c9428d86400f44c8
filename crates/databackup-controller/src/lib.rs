//! DataBackup controller
//!
//! Reconciles Fluid `DataBackup` resources: serializes backups per dataset
//! through a lock on the Dataset status, installs a worker chart that copies
//! the runtime's metadata to the requested path, and records the outcome.
//!
//! - **controller**: the reconcile state machine and error policy
//! - **lock**: the per-dataset `dataBackupRef` lock
//! - **launcher**: worker chart values and installation
//! - **monitor**: worker pod classification and duration formatting
//! - **deletion**: cleanup behind the finalizer

pub mod client;
pub mod controller;
pub mod deletion;
pub mod installer;
pub mod launcher;
pub mod lock;
pub mod monitor;
pub mod runtime;

pub use controller::{error_policy, reconcile, Context};
pub use databackup_common::{Error, Result};
