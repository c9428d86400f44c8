//! Release installation for the worker job

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use databackup_common::Error;

/// Installs and removes chart releases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseInstaller: Send + Sync {
    /// Whether the release is installed
    async fn exists(&self, release: &str, namespace: &str) -> Result<bool, Error>;

    /// Install `chart` as `release` with the given values file
    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &Path,
        chart: &Path,
    ) -> Result<(), Error>;

    /// Remove the release; a missing release is not an error
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), Error>;
}

/// Installer backed by the `helm` binary
pub struct HelmInstaller {
    binary: PathBuf,
}

impl Default for HelmInstaller {
    fn default() -> Self {
        Self::new("helm")
    }
}

impl HelmInstaller {
    /// Use the helm binary at `binary` (looked up in PATH when relative)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, release: &str, args: &[&str]) -> Result<Output, Error> {
        debug!(release, ?args, "running helm");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::release(release, format!("failed to run helm: {e}")))
    }
}

fn is_release_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found")
}

fn failure(release: &str, action: &str, output: &Output) -> Error {
    Error::release(
        release,
        format!(
            "helm {} failed: {}",
            action,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    )
}

#[async_trait]
impl ReleaseInstaller for HelmInstaller {
    async fn exists(&self, release: &str, namespace: &str) -> Result<bool, Error> {
        let output = self
            .run(release, &["status", release, "-n", namespace])
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        if is_release_not_found(&String::from_utf8_lossy(&output.stderr)) {
            return Ok(false);
        }
        Err(failure(release, "status", &output))
    }

    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &Path,
        chart: &Path,
    ) -> Result<(), Error> {
        let values = values.to_string_lossy();
        let chart = chart.to_string_lossy();
        let output = self
            .run(
                release,
                &["install", "-f", &*values, "--namespace", namespace, release, &*chart],
            )
            .await?;
        if !output.status.success() {
            return Err(failure(release, "install", &output));
        }
        info!(release, namespace, "helm release installed");
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), Error> {
        if !self.exists(release, namespace).await? {
            debug!(release, "release already absent");
            return Ok(());
        }
        let output = self
            .run(release, &["uninstall", release, "-n", namespace])
            .await?;
        if !output.status.success() {
            if is_release_not_found(&String::from_utf8_lossy(&output.stderr)) {
                return Ok(());
            }
            return Err(failure(release, "uninstall", &output));
        }
        info!(release, namespace, "helm release uninstalled");
        Ok(())
    }
}
