//! Common types for the DataBackup operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by DataBackup, Dataset and the runtime resources
pub const FLUID_API_GROUP: &str = "data.fluid.io";

/// API version shared by DataBackup, Dataset and the runtime resources
pub const FLUID_API_VERSION: &str = "v1alpha1";

/// Finalizer that gates physical removal of a DataBackup until cleanup ran
pub const DATABACKUP_FINALIZER: &str = "fluid-databackup-controller-finalizer";

/// Field manager / reporting component name used for all writes
pub const CONTROLLER_NAME: &str = "databackup-controller";
