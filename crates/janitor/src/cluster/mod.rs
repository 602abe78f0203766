//! The cluster object store, as seen by the reconcilers.
//!
//! [`ClusterStore`] speaks in object names and key/byte maps rather than full
//! Kubernetes manifests. [`KubeCluster`] backs it with the API server.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::util::errors::Result;

mod kubernetes;
pub use kubernetes::KubeCluster;

/// Key to raw bytes, the payload of a config object or secret.
pub type ObjectData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::ConfigMap => write!(f, "ConfigMap"),
            ObjectKind::Secret => write!(f, "Secret"),
        }
    }
}

/// A partial update of an existing object.
#[derive(Debug, Clone)]
pub enum ObjectPatch {
    /// RFC 7386 merge patch
    Merge(serde_json::Value),
    /// RFC 6902 JSON patch
    Json(json_patch::Patch),
}

/// The two workload controllers an instance may be deployed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    /// Probe order used when the kind of an instance is unknown.
    pub const PROBE_ORDER: [WorkloadKind; 2] = [WorkloadKind::Deployment, WorkloadKind::StatefulSet];
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
}

impl Workload {
    pub fn is_ready(&self) -> bool {
        self.desired_replicas == self.ready_replicas
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    pub name: String,
    /// Load-balancer ingress IPs in the order reported by the cluster, empty
    /// strings included
    pub ingress_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub containers: Vec<String>,
}

/// Operations against the cluster object store.
///
/// Lookups return `Ok(None)` (or `false`) for absent objects; errors are
/// reserved for transport and server failures. Creating an object that already
/// exists fails with `StdError::AlreadyExists`.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    async fn create_namespace(
        &self,
        namespace: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<ObjectData>>;

    async fn create_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()>;

    /// Overwrite the whole payload of an existing object.
    async fn replace_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()>;

    async fn patch_object(&self, kind: ObjectKind, namespace: &str, name: &str, patch: &ObjectPatch) -> Result<()>;

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()>;

    /// Names of every object of `kind` in the namespace.
    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<String>>;

    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceSummary>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>>;

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Drain the complete log of a pod, optionally of one named container.
    async fn pod_logs(&self, namespace: &str, name: &str, container: Option<&str>) -> Result<String>;
}
