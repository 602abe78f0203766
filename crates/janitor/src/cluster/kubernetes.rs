use async_trait::async_trait;
use futures::AsyncReadExt;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, StatefulSet},
        core::v1::{ConfigMap, Namespace, Pod, Secret, Service},
    },
    ByteString,
};
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, ObjectMeta, Patch, PatchParams, PostParams},
    client::Client,
    ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{ClusterStore, ObjectData, ObjectKind, ObjectPatch, PodSummary, ServiceSummary, Workload, WorkloadKind};
use crate::util::errors::{Error, Result, StdError};

/// [`ClusterStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate API conflicts and absences into the domain taxonomy.
fn kube_error(e: kube::Error, what: impl Into<String>) -> Error {
    match e {
        kube::Error::Api(api_err) if api_err.code == 409 => Error::StdError(StdError::AlreadyExists(what.into())),
        kube::Error::Api(api_err) if api_err.code == 404 => Error::StdError(StdError::NotFound(what.into())),
        e => Error::StdError(StdError::KubeError(e)),
    }
}

/// Split raw file contents between the `data` and `binaryData` fields of a ConfigMap.
pub(crate) fn config_map_payload(
    data: &ObjectData,
) -> (Option<BTreeMap<String, String>>, Option<BTreeMap<String, ByteString>>) {
    let mut text = BTreeMap::new();
    let mut binary = BTreeMap::new();
    for (key, value) in data {
        match std::str::from_utf8(value) {
            Ok(s) => {
                text.insert(key.clone(), s.to_string());
            }
            Err(_) => {
                binary.insert(key.clone(), ByteString(value.clone()));
            }
        }
    }
    (
        (!text.is_empty()).then_some(text),
        (!binary.is_empty()).then_some(binary),
    )
}

fn config_map_data(cm: ConfigMap) -> ObjectData {
    let mut data: ObjectData = cm
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.into_bytes()))
        .collect();
    data.extend(cm.binary_data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)));
    data
}

fn desired_config_map(namespace: &str, name: &str, data: &ObjectData) -> ConfigMap {
    let (text, binary) = config_map_payload(data);
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        // the API server drops empty maps; keep an empty group visible as an empty `data`
        data: Some(text.unwrap_or_default()),
        binary_data: binary,
        ..Default::default()
    }
}

fn desired_secret(namespace: &str, name: &str, data: &ObjectData) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        ),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterStore for KubeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get(namespace).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn create_namespace(
        &self,
        namespace: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: (!labels.is_empty()).then_some(labels),
                annotations: (!annotations.is_empty()).then_some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        info!("Creating Namespace '{}'", namespace);
        namespaces
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| kube_error(e, format!("namespace {namespace}")))?;
        Ok(())
    }

    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<ObjectData>> {
        let found = match kind {
            ObjectKind::ConfigMap => self.config_maps(namespace).get(name).await.map(config_map_data),
            ObjectKind::Secret => self.secrets(namespace).get(name).await.map(|secret| {
                secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect()
            }),
        };
        match found {
            Ok(data) => Ok(Some(data)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn create_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()> {
        info!("Creating {} '{}' in namespace '{}'", kind, name, namespace);
        let pp = PostParams::default();
        let created = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .create(&pp, &desired_config_map(namespace, name, data))
                .await
                .map(|_| ()),
            ObjectKind::Secret => self
                .secrets(namespace)
                .create(&pp, &desired_secret(namespace, name, data))
                .await
                .map(|_| ()),
        };
        created.map_err(|e| kube_error(e, format!("{kind} {name}")))
    }

    async fn replace_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()> {
        info!("Replacing {} '{}' in namespace '{}'", kind, name, namespace);
        let pp = PostParams::default();
        let replaced = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .replace(name, &pp, &desired_config_map(namespace, name, data))
                .await
                .map(|_| ()),
            ObjectKind::Secret => self
                .secrets(namespace)
                .replace(name, &pp, &desired_secret(namespace, name, data))
                .await
                .map(|_| ()),
        };
        replaced.map_err(|e| kube_error(e, format!("{kind} {name}")))
    }

    async fn patch_object(&self, kind: ObjectKind, namespace: &str, name: &str, patch: &ObjectPatch) -> Result<()> {
        info!("Patching {} '{}' in namespace '{}'", kind, name, namespace);
        let pp = PatchParams::default();
        let patched = match (kind, patch) {
            (ObjectKind::ConfigMap, ObjectPatch::Merge(doc)) => self
                .config_maps(namespace)
                .patch(name, &pp, &Patch::Merge(doc))
                .await
                .map(|_| ()),
            (ObjectKind::ConfigMap, ObjectPatch::Json(ops)) => self
                .config_maps(namespace)
                .patch(name, &pp, &Patch::<()>::Json(ops.clone()))
                .await
                .map(|_| ()),
            (ObjectKind::Secret, ObjectPatch::Merge(doc)) => self
                .secrets(namespace)
                .patch(name, &pp, &Patch::Merge(doc))
                .await
                .map(|_| ()),
            (ObjectKind::Secret, ObjectPatch::Json(ops)) => self
                .secrets(namespace)
                .patch(name, &pp, &Patch::<()>::Json(ops.clone()))
                .await
                .map(|_| ()),
        };
        patched.map_err(|e| kube_error(e, format!("{kind} {name}")))
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        info!("Deleting {} '{}' in namespace '{}'", kind, name, namespace);
        let dp = DeleteParams::default();
        let deleted = match kind {
            ObjectKind::ConfigMap => self.config_maps(namespace).delete(name, &dp).await.map(|_| ()),
            ObjectKind::Secret => self.secrets(namespace).delete(name, &dp).await.map(|_| ()),
        };
        deleted.map_err(|e| kube_error(e, format!("{kind} {name}")))
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<String>> {
        let lp = ListParams::default();
        let names = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .list(&lp)
                .await
                .map(|list| list.items.iter().map(|cm| cm.name_any()).collect()),
            ObjectKind::Secret => self
                .secrets(namespace)
                .list(&lp)
                .await
                .map(|list| list.items.iter().map(|s| s.name_any()).collect()),
        };
        names.map_err(|e| Error::StdError(StdError::KubeError(e)))
    }

    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>> {
        debug!("Looking for {} '{}' in namespace '{}'", kind, name, namespace);
        // an unset replica count defaults to one on the API server
        let found = match kind {
            WorkloadKind::Deployment => {
                let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                deployments.get(name).await.map(|d| Workload {
                    kind,
                    desired_replicas: d.spec.and_then(|s| s.replicas).unwrap_or(1),
                    ready_replicas: d.status.and_then(|s| s.ready_replicas).unwrap_or(0),
                })
            }
            WorkloadKind::StatefulSet => {
                let stateful_sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                stateful_sets.get(name).await.map(|s| Workload {
                    kind,
                    desired_replicas: s.spec.and_then(|s| s.replicas).unwrap_or(1),
                    ready_replicas: s.status.and_then(|s| s.ready_replicas).unwrap_or(0),
                })
            }
        };
        match found {
            Ok(workload) => Ok(Some(workload)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceSummary>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match services.get(name).await {
            Ok(service) => Ok(Some(ServiceSummary {
                name: service.name_any(),
                ingress_ips: service
                    .status
                    .and_then(|s| s.load_balancer)
                    .and_then(|lb| lb.ingress)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|ingress| ingress.ip.unwrap_or_default())
                    .collect(),
            })),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| PodSummary {
                name: pod.name_any(),
                containers: pod
                    .spec
                    .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.pods(namespace).get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn pod_logs(&self, namespace: &str, name: &str, container: Option<&str>) -> Result<String> {
        let lp = LogParams {
            container: container.map(str::to_string),
            ..Default::default()
        };
        let stream = self.pods(namespace).log_stream(name, &lp).await.map_err(|e| {
            Error::StdError(StdError::IoError(format!("failed to open log stream of pod {name}: {e}")))
        })?;
        let mut stream = Box::pin(stream);
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.map_err(|e| {
            Error::StdError(StdError::IoError(format!("failed to read log stream of pod {name}: {e}")))
        })?;
        match String::from_utf8(buf) {
            Ok(logs) => Ok(logs),
            Err(e) => {
                debug!(
                    "Log stream of pod '{}' is not valid UTF-8 after byte {}, replacing invalid sequences",
                    name,
                    e.utf8_error().valid_up_to()
                );
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }
}
