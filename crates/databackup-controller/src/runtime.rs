//! Storage runtime variants and the probe that talks to their masters
//!
//! Every runtime-specific name (container, CLI binary, default image,
//! values ConfigMap) comes from [`RuntimeKind`]. Adding a runtime means
//! adding a variant here; the state machine never matches on runtime names.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use databackup_common::crd::RuntimeBinding;
use databackup_common::Error;

/// Storage runtimes a DataBackup can be taken from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    /// Alluxio
    Alluxio,
    /// GooseFS
    GooseFs,
}

impl RuntimeKind {
    /// Every supported runtime
    pub const ALL: [RuntimeKind; 2] = [RuntimeKind::Alluxio, RuntimeKind::GooseFs];

    /// Parse the `type` of a dataset runtime binding
    pub fn from_type(type_: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == type_)
    }

    /// Variant for a binding, `None` when the runtime type is unsupported
    pub fn from_binding(binding: &RuntimeBinding) -> Option<Self> {
        Self::from_type(&binding.type_)
    }

    /// Runtime type as it appears in bindings, charts and CLI names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alluxio => "alluxio",
            Self::GooseFs => "goosefs",
        }
    }

    /// Kind of the runtime custom resource
    pub fn resource_kind(self) -> &'static str {
        match self {
            Self::Alluxio => "AlluxioRuntime",
            Self::GooseFs => "GooseFSRuntime",
        }
    }

    /// Container running the master process in the master pods
    pub fn master_container(self) -> String {
        format!("{}-master", self.as_str())
    }

    /// Built-in worker image used when nothing else is configured
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Alluxio => "registry.aliyuncs.com/alluxio/alluxio:2.3.0-SNAPSHOT-238b7eb",
            Self::GooseFs => "ccr.ccs.tencentyun.com/qcloud/goosefs:v1.0.1",
        }
    }

    /// ConfigMap holding the values the runtime itself was installed with
    pub fn values_config_map(self, dataset: &str) -> String {
        format!("{}-{}-values", dataset, self.as_str())
    }

    /// JVM options pointing the runtime client at the active master
    pub fn client_env(self, host_ip: &str, rpc_port: i32) -> String {
        format!(
            "-D{rt}.master.hostname={host_ip} -D{rt}.master.rpc.port={rpc_port}",
            rt = self.as_str()
        )
    }

    fn ready_command(self) -> Vec<String> {
        vec![
            self.as_str().to_string(),
            "fsadmin".to_string(),
            "report".to_string(),
        ]
    }

    fn master_info_command(self) -> Vec<String> {
        vec![
            self.as_str().to_string(),
            "fs".to_string(),
            "masterInfo".to_string(),
        ]
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the first master pod of a dataset's runtime
pub fn master_pod_name(dataset: &str) -> String {
    format!("{}-master-0", dataset)
}

/// Queries against a running storage runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    /// Whether the runtime cluster answers administrative requests
    async fn is_ready(&self, kind: RuntimeKind, namespace: &str, dataset: &str)
        -> Result<bool, Error>;

    /// Pod name of the current leader among several masters
    async fn leader_master(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        dataset: &str,
    ) -> Result<String, Error>;
}

/// Probe that execs the runtime CLI inside the first master pod
pub struct ExecRuntimeProbe {
    client: Client,
}

impl ExecRuntimeProbe {
    /// Create a probe using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn exec(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        dataset: &str,
        command: Vec<String>,
    ) -> Result<String, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = master_pod_name(dataset);
        let params = AttachParams::default()
            .container(kind.master_container())
            .stderr(true);

        debug!(pod = %pod, ?command, "exec in runtime master");
        let mut attached = pods.exec(&pod, command, &params).await?;

        let (out, err) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::try_join!(read_stream(out), read_stream(err))
        .map_err(|e| Error::runtime(dataset, kind.as_str(), format!("reading exec output: {e}")))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        let succeeded = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .is_some_and(|s| s == "Success");
        if !succeeded {
            let message = status.and_then(|s| s.message).unwrap_or(stderr);
            return Err(Error::runtime(
                dataset,
                kind.as_str(),
                format!("command failed in {pod}: {}", message.trim()),
            ));
        }

        Ok(stdout)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = stream {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

#[async_trait]
impl RuntimeProbe for ExecRuntimeProbe {
    async fn is_ready(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        dataset: &str,
    ) -> Result<bool, Error> {
        match self
            .exec(kind, namespace, dataset, kind.ready_command())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(dataset, runtime = %kind, error = %e, "runtime not ready");
                Ok(false)
            }
        }
    }

    async fn leader_master(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        dataset: &str,
    ) -> Result<String, Error> {
        let output = self
            .exec(kind, namespace, dataset, kind.master_info_command())
            .await?;
        parse_leader(&output).ok_or_else(|| {
            Error::runtime(
                dataset,
                kind.as_str(),
                format!("unexpected masterInfo output: {:?}", output.lines().next()),
            )
        })
    }
}

/// Extract the leader pod from `fs masterInfo` output
///
/// The first line reads `Current leader master: <pod>:<port>`.
pub fn parse_leader(output: &str) -> Option<String> {
    let address = output.lines().next()?.split_whitespace().nth(3)?;
    let pod = address.split(':').next()?;
    (!pod.is_empty()).then(|| pod.to_string())
}
