//! Cluster access used by the DataBackup controller
//!
//! Writes that must not clobber concurrent updates carry the object's
//! `resourceVersion` inside a merge patch. The API server rejects such a patch
//! with 409 when the object moved on, which surfaces as [`Error::StaleWrite`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use databackup_common::crd::{DataBackup, DataBackupStatus, Dataset, RuntimeSpec};
use databackup_common::kube_utils::{is_conflict, is_not_found};
use databackup_common::{
    Error, CONTROLLER_NAME, DATABACKUP_FINALIZER, FLUID_API_GROUP, FLUID_API_VERSION,
};

use crate::runtime::RuntimeKind;

/// Trait abstracting Kubernetes operations for DataBackup reconciliation
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupClient: Send + Sync {
    /// Get a Dataset, `None` when it does not exist
    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error>;

    /// Set `dataBackupRef`, rejected if the dataset changed since `dataset` was read
    async fn write_dataset_lock(&self, dataset: &Dataset, backup_ref: &str) -> Result<(), Error>;

    /// Clear `dataBackupRef` without a version check
    async fn clear_dataset_lock(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Replace the DataBackup status, rejected if the backup changed since read
    async fn update_backup_status(
        &self,
        backup: &DataBackup,
        status: &DataBackupStatus,
    ) -> Result<(), Error>;

    /// Add the controller finalizer to a DataBackup
    async fn add_finalizer(&self, backup: &DataBackup) -> Result<(), Error>;

    /// Remove the controller finalizer from a DataBackup
    async fn remove_finalizer(&self, backup: &DataBackup) -> Result<(), Error>;

    /// Append an owner reference to a DataBackup
    async fn add_owner_reference(
        &self,
        backup: &DataBackup,
        owner: OwnerReference,
    ) -> Result<(), Error>;

    /// Get a Pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Get a ConfigMap by name
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Read the spec of the runtime resource bound to a dataset
    async fn get_runtime_spec(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RuntimeSpec>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeBackupClient {
    client: Client,
}

impl KubeBackupClient {
    /// Create a new KubeBackupClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn backups(&self, namespace: &str) -> Api<DataBackup> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn datasets(&self, namespace: &str) -> Api<Dataset> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn patch_params() -> PatchParams {
    PatchParams::apply(CONTROLLER_NAME)
}

/// Merge patch carrying `resourceVersion` so the server enforces freshness
fn guarded_patch(resource_version: Option<String>, mut body: Value) -> Value {
    if let (Some(rv), Some(obj)) = (resource_version, body.as_object_mut()) {
        let metadata = obj.entry("metadata").or_insert_with(|| json!({}));
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert("resourceVersion".to_string(), Value::String(rv));
        }
    }
    body
}

/// Map a 409 from a guarded patch onto a stale write for `kind` `namespace/name`
fn stale_on_conflict(
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> impl FnOnce(kube::Error) -> Error {
    let target = format!("{}/{}", namespace, name);
    move |e| {
        if is_conflict(&e) {
            Error::stale_write(kind, target)
        } else {
            Error::from(e)
        }
    }
}

#[async_trait]
impl BackupClient for KubeBackupClient {
    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error> {
        Ok(self.datasets(namespace).get_opt(name).await?)
    }

    async fn write_dataset_lock(&self, dataset: &Dataset, backup_ref: &str) -> Result<(), Error> {
        let namespace = dataset.namespace().unwrap_or_default();
        let name = dataset.name_any();
        let patch = guarded_patch(
            dataset.resource_version(),
            json!({ "status": { "dataBackupRef": backup_ref } }),
        );

        self.datasets(&namespace)
            .patch_status(&name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(stale_on_conflict("Dataset", &namespace, &name))?;
        Ok(())
    }

    async fn clear_dataset_lock(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let patch = json!({ "status": { "dataBackupRef": "" } });
        match self
            .datasets(namespace)
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(dataset = %name, "dataset already gone, nothing to unlock");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_backup_status(
        &self,
        backup: &DataBackup,
        status: &DataBackupStatus,
    ) -> Result<(), Error> {
        let namespace = backup.namespace().unwrap_or_default();
        let name = backup.name_any();
        let patch = guarded_patch(backup.resource_version(), json!({ "status": status }));

        self.backups(&namespace)
            .patch_status(&name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(stale_on_conflict("DataBackup", &namespace, &name))?;
        Ok(())
    }

    async fn add_finalizer(&self, backup: &DataBackup) -> Result<(), Error> {
        let mut finalizers = backup.finalizers().to_vec();
        if finalizers.iter().any(|f| f == DATABACKUP_FINALIZER) {
            return Ok(());
        }
        finalizers.push(DATABACKUP_FINALIZER.to_string());

        let namespace = backup.namespace().unwrap_or_default();
        let name = backup.name_any();
        let patch = guarded_patch(
            backup.resource_version(),
            json!({ "metadata": { "finalizers": finalizers } }),
        );

        self.backups(&namespace)
            .patch(&name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(stale_on_conflict("DataBackup", &namespace, &name))?;
        Ok(())
    }

    async fn remove_finalizer(&self, backup: &DataBackup) -> Result<(), Error> {
        let finalizers: Vec<String> = backup
            .finalizers()
            .iter()
            .filter(|f| *f != DATABACKUP_FINALIZER)
            .cloned()
            .collect();

        let namespace = backup.namespace().unwrap_or_default();
        let name = backup.name_any();
        let patch = guarded_patch(
            backup.resource_version(),
            json!({ "metadata": { "finalizers": finalizers } }),
        );

        match self
            .backups(&namespace)
            .patch(&name, &patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(stale_on_conflict("DataBackup", &namespace, &name)(e)),
        }
    }

    async fn add_owner_reference(
        &self,
        backup: &DataBackup,
        owner: OwnerReference,
    ) -> Result<(), Error> {
        let mut owners = backup.owner_references().to_vec();
        if owners.iter().any(|o| o.uid == owner.uid) {
            return Ok(());
        }
        owners.push(owner);

        let namespace = backup.namespace().unwrap_or_default();
        let name = backup.name_any();
        let patch = guarded_patch(
            backup.resource_version(),
            json!({ "metadata": { "ownerReferences": owners } }),
        );

        self.backups(&namespace)
            .patch(&name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(stale_on_conflict("DataBackup", &namespace, &name))?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_runtime_spec(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RuntimeSpec>, Error> {
        let gvk = GroupVersionKind::gvk(FLUID_API_GROUP, FLUID_API_VERSION, kind.resource_kind());
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);

        let Some(obj) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let spec = obj.data.get("spec").cloned().unwrap_or_else(|| json!({}));
        Ok(Some(serde_json::from_value(spec)?))
    }
}
