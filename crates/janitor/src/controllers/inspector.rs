use tracing::info;

use super::namespace::require_namespace;
use crate::api::{Instance, PodInfo, PodRef};
use crate::cluster::ClusterStore;
use crate::util::errors::{Error, Result, StdError};

/// Read-only view of the pods running an instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceInspector;

impl InstanceInspector {
    /// Pods named `<uid>-...` with their containers in declaration order.
    pub async fn list_pods(&self, store: &dyn ClusterStore, instance: &Instance) -> Result<Vec<PodInfo>> {
        require_namespace(store, &instance.namespace).await?;

        let prefix = format!("{}-", instance.uid);
        let pods: Vec<PodInfo> = store
            .list_pods(&instance.namespace)
            .await?
            .into_iter()
            .filter(|pod| pod.name.starts_with(&prefix))
            .map(|pod| PodInfo {
                display_name: pod.name.clone(),
                name: pod.name,
                containers: pod.containers,
            })
            .collect();

        info!("Found {} pods of {} in {}", pods.len(), instance.uid, instance.namespace);
        Ok(pods)
    }

    /// Full log of the first named container of `pod`, or of its default
    /// container when none is named.
    pub async fn get_logs(&self, store: &dyn ClusterStore, instance: &Instance, pod: &PodRef) -> Result<String> {
        require_namespace(store, &instance.namespace).await?;
        if !store.pod_exists(&instance.namespace, &pod.name).await? {
            return Err(Error::StdError(StdError::NotFound("pod not found".to_string())));
        }

        let container = pod.containers.first().map(String::as_str);
        info!(
            "Collecting logs from pod/container {}/{} in namespace {}",
            pod.name,
            container.unwrap_or_default(),
            instance.namespace
        );
        let logs = store.pod_logs(&instance.namespace, &pod.name, container).await?;
        info!("Collected {} bytes of logs from {}", logs.len(), pod.name);
        Ok(logs)
    }
}
