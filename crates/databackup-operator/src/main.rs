//! DataBackup operator - runs the Fluid DataBackup controller

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use databackup_common::crd::DataBackup;
use databackup_common::telemetry::{init_telemetry, TelemetryConfig};
use databackup_controller::launcher::{LauncherConfig, DEFAULT_WORKDIR};
use databackup_controller::{error_policy, reconcile, Context};

/// Fluid DataBackup controller
#[derive(Parser, Debug)]
#[command(name = "databackup-operator", version, about, long_about = None)]
struct Cli {
    /// Print the DataBackup CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Working directory handed to backup workers
    #[arg(long, env = "FLUID_WORKDIR", default_value = DEFAULT_WORKDIR)]
    workdir: String,

    /// Directory holding the installed charts
    #[arg(long, env = "FLUID_CHARTS_DIR", default_value = "/charts")]
    charts_dir: PathBuf,

    /// Worker image override for Alluxio runtimes (`repo:tag`)
    #[arg(long, env = "ALLUXIO_RUNTIME_IMAGE_ENV")]
    alluxio_image: Option<String>,

    /// Worker image override for GooseFS runtimes (`repo:tag`)
    #[arg(long, env = "GOOSEFS_RUNTIME_IMAGE_ENV")]
    goosefs_image: Option<String>,

    /// Init-users image override (`repo:tag`)
    #[arg(long, env = "DEFAULT_INIT_IMAGE_ENV")]
    init_image: Option<String>,
}

impl Cli {
    fn launcher_config(&self) -> LauncherConfig {
        LauncherConfig {
            workdir: self.workdir.clone(),
            charts_dir: self.charts_dir.clone(),
            alluxio_image: self.alluxio_image.clone(),
            goosefs_image: self.goosefs_image.clone(),
            init_image: self.init_image.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&DataBackup::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let launcher = cli.launcher_config();
    tracing::info!(
        workdir = %launcher.workdir,
        charts_dir = %launcher.charts_dir.display(),
        "Starting DataBackup controller"
    );

    let ctx = Arc::new(Context::new(client.clone(), launcher));
    let backups: Api<DataBackup> = Api::all(client);

    Controller::new(backups, WatcherConfig::default().timeout(25))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(backup = %obj.name, ?action, "DataBackup reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "DataBackup reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("DataBackup controller stopped");
    Ok(())
}
