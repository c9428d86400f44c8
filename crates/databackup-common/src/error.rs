//! Error types for the DataBackup operator
//!
//! Errors carry the resource names involved so a log line is enough to find
//! the offending object. Every variant is recoverable by requeueing; terminal
//! user-facing failures are recorded in the DataBackup status instead.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for DataBackup operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A conditional write was rejected because the object changed since it was read
    #[error("stale write to {kind} {name}: object was modified concurrently")]
    StaleWrite {
        /// Resource kind (DataBackup, Dataset)
        kind: String,
        /// namespace/name of the resource
        name: String,
    },

    /// Storage runtime probe failed (exec into master, unparseable output)
    #[error("runtime error [{runtime}] for dataset {dataset}: {message}")]
    Runtime {
        /// Dataset whose runtime was probed
        dataset: String,
        /// Runtime type (alluxio, goosefs)
        runtime: String,
        /// Description of what failed
        message: String,
    },

    /// Release installer (helm) failure
    #[error("release error for {release}: {message}")]
    Release {
        /// Release name
        release: String,
        /// Description of what failed
        message: String,
    },

    /// Worker image could not be resolved from any source
    #[error("image configuration error: {message}")]
    ImageConfig {
        /// Description of what is malformed
        message: String,
    },

    /// Operator configuration is incomplete for the requested backup
    #[error("configuration error for {backup}: {message}")]
    Configuration {
        /// namespace/name of the DataBackup
        backup: String,
        /// Description of what is missing
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "launcher", "values-file")
        context: String,
    },
}

impl Error {
    /// Create a stale-write error for a resource
    pub fn stale_write(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::StaleWrite {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a runtime probe error
    pub fn runtime(
        dataset: impl Into<String>,
        runtime: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Runtime {
            dataset: dataset.into(),
            runtime: runtime.into(),
            message: msg.into(),
        }
    }

    /// Create a release installer error
    pub fn release(release: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Release {
            release: release.into(),
            message: msg.into(),
        }
    }

    /// Create an image configuration error
    pub fn image_config(msg: impl Into<String>) -> Self {
        Self::ImageConfig {
            message: msg.into(),
        }
    }

    /// Create a configuration error for a backup
    pub fn configuration(backup: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            backup: backup.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a rejected conditional write
    pub fn is_stale_write(&self) -> bool {
        match self {
            Error::StaleWrite { .. } => true,
            Error::Kube { source } => {
                matches!(source, kube::Error::Api(ae) if ae.code == 409)
            }
            _ => false,
        }
    }

    /// Check if retrying the same operation can succeed without a config change
    ///
    /// Image and configuration errors need an operator or runtime fix first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::StaleWrite { .. } => true,
            Error::Runtime { .. } => true,
            Error::Release { .. } => true,
            Error::ImageConfig { .. } => false,
            Error::Configuration { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
