use std::fmt;
use tracing::debug;

use super::namespace::NAMESPACE_NOT_FOUND;
use crate::api::{Instance, Status};
use crate::cluster::{ClusterStore, Workload, WorkloadKind};
use crate::util::errors::Result;

pub const NO_WORKLOAD: &str = "neither deployment nor statefulset found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Ready,
    Pending,
    Failed,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Ready => write!(f, "READY"),
            InstanceStatus::Pending => write!(f, "PENDING"),
            InstanceStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl From<InstanceStatus> for Status {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Ready => Status::Ok,
            InstanceStatus::Pending => Status::Pending,
            InstanceStatus::Failed => Status::Failed,
        }
    }
}

/// A point-in-time readiness answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: InstanceStatus,
    pub message: String,
}

impl Evaluation {
    fn new(status: InstanceStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_workload(workload: &Workload) -> Self {
        if workload.is_ready() {
            Self::new(InstanceStatus::Ready, format!("{} is ready", workload.kind))
        } else {
            Self::new(
                InstanceStatus::Pending,
                format!("waiting for {}", workload.kind.to_string().to_lowercase()),
            )
        }
    }
}

/// Derives readiness from the workload running an instance.
///
/// Errors are reserved for failed lookups; a missing namespace or workload is
/// a `Failed` evaluation.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusEvaluator;

impl StatusEvaluator {
    pub async fn evaluate(&self, store: &dyn ClusterStore, instance: &Instance) -> Result<Evaluation> {
        if !store.namespace_exists(&instance.namespace).await? {
            return Ok(Evaluation::new(InstanceStatus::Failed, NAMESPACE_NOT_FOUND));
        }

        for kind in WorkloadKind::PROBE_ORDER {
            if let Some(workload) = store.get_workload(kind, &instance.namespace, &instance.uid).await? {
                debug!(
                    "{} {}/{} has {}/{} ready replicas",
                    kind, instance.namespace, instance.uid, workload.ready_replicas, workload.desired_replicas
                );
                return Ok(Evaluation::from_workload(&workload));
            }
        }

        Ok(Evaluation::new(InstanceStatus::Failed, NO_WORKLOAD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemoryCluster;

    fn instance() -> Instance {
        Instance::new("app1", "ns1", "acme")
    }

    fn workload(kind: WorkloadKind, desired: i32, ready: i32) -> Workload {
        Workload {
            kind,
            desired_replicas: desired,
            ready_replicas: ready,
        }
    }

    #[tokio::test]
    async fn missing_namespace_fails() {
        let store = MemoryCluster::new();

        let eval = StatusEvaluator.evaluate(&store, &instance()).await.unwrap();

        assert_eq!(eval, Evaluation::new(InstanceStatus::Failed, "namespace not found"));
    }

    #[tokio::test]
    async fn deployment_becomes_ready_when_all_replicas_are() {
        let pending = MemoryCluster::new()
            .with_namespace("ns1")
            .with_workload("ns1", "app1", workload(WorkloadKind::Deployment, 3, 2));
        let ready = MemoryCluster::new()
            .with_namespace("ns1")
            .with_workload("ns1", "app1", workload(WorkloadKind::Deployment, 3, 3));

        let eval = StatusEvaluator.evaluate(&pending, &instance()).await.unwrap();
        assert_eq!(eval, Evaluation::new(InstanceStatus::Pending, "waiting for deployment"));

        let eval = StatusEvaluator.evaluate(&ready, &instance()).await.unwrap();
        assert_eq!(eval, Evaluation::new(InstanceStatus::Ready, "Deployment is ready"));
    }

    #[tokio::test]
    async fn statefulset_is_probed_when_no_deployment_exists() {
        let store = MemoryCluster::new()
            .with_namespace("ns1")
            .with_workload("ns1", "app1", workload(WorkloadKind::StatefulSet, 1, 0));

        let eval = StatusEvaluator.evaluate(&store, &instance()).await.unwrap();

        assert_eq!(eval, Evaluation::new(InstanceStatus::Pending, "waiting for statefulset"));
    }

    #[tokio::test]
    async fn every_combination_yields_exactly_one_status() {
        for namespace in [false, true] {
            for deployment in [None, Some(true), Some(false)] {
                for statefulset in [None, Some(true), Some(false)] {
                    let mut store = MemoryCluster::new();
                    if namespace {
                        store = store.with_namespace("ns1");
                    }
                    if let Some(ready) = deployment {
                        store = store.with_workload("ns1", "app1", workload(WorkloadKind::Deployment, 2, if ready { 2 } else { 1 }));
                    }
                    if let Some(ready) = statefulset {
                        store = store.with_workload("ns1", "app1", workload(WorkloadKind::StatefulSet, 2, if ready { 2 } else { 0 }));
                    }

                    let eval = StatusEvaluator.evaluate(&store, &instance()).await.unwrap();

                    let expected = match (namespace, deployment.or(statefulset)) {
                        (false, _) => InstanceStatus::Failed,
                        (true, None) => InstanceStatus::Failed,
                        (true, Some(true)) => InstanceStatus::Ready,
                        (true, Some(false)) => InstanceStatus::Pending,
                    };
                    assert_eq!(
                        eval.status, expected,
                        "namespace={namespace} deployment={deployment:?} statefulset={statefulset:?}"
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let store = MemoryCluster::new().with_namespace("ns1").with_failure("app1");

        assert!(StatusEvaluator.evaluate(&store, &instance()).await.is_err());
    }

    #[test]
    fn maps_onto_response_status() {
        assert_eq!(Status::from(InstanceStatus::Ready), Status::Ok);
        assert_eq!(Status::from(InstanceStatus::Pending), Status::Pending);
        assert_eq!(Status::from(InstanceStatus::Failed), Status::Failed);
    }
}
