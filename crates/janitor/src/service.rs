use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::api::v1::{
    check_api, InfoServiceResponse, InstanceCredentialsRequest, InstanceRequest, NamespaceRequest, PodListResponse,
    PodLogsResponse, PodRequest, ServiceResponse,
};
use crate::cluster::ClusterStore;
use crate::controllers::{
    endpoint, namespace, ConfigReconciler, CredentialReconciler, InstanceInspector, Outcome, SaltSource,
    SecretRemoval, StatusEvaluator, UpdateStrategy,
};
use crate::source::SourceTree;
use crate::util::errors::{Error, Result, StdError};
use crate::util::metrics::Metrics;

/// An envelope, plus the error behind it when the operation failed.
///
/// The envelope always describes the outcome; the error is kept for callers
/// that need its kind, such as the HTTP layer choosing a status code.
#[derive(Debug)]
pub struct Answer<T> {
    pub body: T,
    pub error: Option<Error>,
}

impl<T> Answer<T> {
    fn ok(body: T) -> Self {
        Self { body, error: None }
    }

    fn failed(body: T, error: Error) -> Self {
        Self {
            body,
            error: Some(error),
        }
    }
}

/// The text of a `NotFound`, or `fallback` for every other failure.
fn failure_message(e: &Error, fallback: &str) -> String {
    match e.root() {
        StdError::NotFound(what) => what.clone(),
        _ => fallback.to_string(),
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_operation: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_operation: None,
        }
    }
}

/// State shared between the service and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the service
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Build the service, registering its metrics with this state. Call once per state.
    pub fn to_service(
        &self,
        cluster: Arc<dyn ClusterStore>,
        source: Arc<dyn SourceTree>,
        config_update_strategy: UpdateStrategy,
        revision: &str,
    ) -> Result<JanitorService> {
        let metrics = Metrics::default().register(&self.registry).map_err(|e| {
            Error::StdError(StdError::InvalidArgument(format!("failed to register metrics: {e}")))
        })?;
        Ok(JanitorService {
            cluster,
            source,
            config: ConfigReconciler::new(config_update_strategy, revision),
            credentials: CredentialReconciler::default(),
            status: StatusEvaluator,
            inspector: InstanceInspector,
            metrics,
            diagnostics: self.diagnostics.clone(),
        })
    }
}

/// One method per remote operation.
///
/// Every method rejects an unsupported API tag with
/// `Err(StdError::UnsupportedVersion)` before doing anything else. Past that
/// point an envelope is always returned, failures included.
pub struct JanitorService {
    cluster: Arc<dyn ClusterStore>,
    source: Arc<dyn SourceTree>,
    config: ConfigReconciler,
    credentials: CredentialReconciler,
    status: StatusEvaluator,
    inspector: InstanceInspector,
    metrics: Metrics,
    diagnostics: Arc<RwLock<Diagnostics>>,
}

impl JanitorService {
    /// Use `salt` for credential hashing instead of the OS generator.
    pub fn with_salt(mut self, salt: Box<dyn SaltSource>) -> Self {
        self.credentials = CredentialReconciler::new(salt);
        self
    }

    async fn record(&self, operation: &str) {
        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.last_event = Utc::now();
        diagnostics.last_operation = Some(operation.to_string());
    }

    fn check(&self, operation: &str, api: &str) -> Result<()> {
        check_api(api).inspect_err(|e| self.metrics.operation_failure(operation, e))
    }

    fn settle<T, B>(
        &self,
        operation: &str,
        result: Result<T>,
        ok: impl FnOnce(T) -> B,
        failed: impl FnOnce(&Error) -> B,
    ) -> Answer<B> {
        match result {
            Ok(value) => Answer::ok(ok(value)),
            Err(e) => {
                self.metrics.operation_failure(operation, &e);
                Answer::failed(failed(&e), e)
            }
        }
    }

    pub async fn config_create_or_replace(&self, req: &InstanceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "config_create_or_replace";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.config.reconcile(&*self.cluster, &*self.source, &req.deployment).await;
        Ok(self.settle(
            OP,
            result,
            |applied| {
                info!("Applied ConfigMaps {:?} of {}", applied, req.deployment.uid);
                ServiceResponse::ok("ConfigMap created/updated successfully")
            },
            |e| {
                let message = match e {
                    Error::PartialFailure(p) => format!("ConfigMap {} failed after others were applied", p.failed),
                    e => match e.root() {
                        StdError::NotFound(_) | StdError::AmbiguousSource(_) => {
                            "cannot find corresponding GitLab project".to_string()
                        }
                        StdError::InvalidArgument(_) => "invalid configuration group name".to_string(),
                        _ => "failed to create ConfigMap".to_string(),
                    },
                };
                ServiceResponse::failed(message, e)
            },
        ))
    }

    pub async fn config_delete(&self, req: &InstanceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "config_delete";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.config.teardown(&*self.cluster, &req.deployment).await;
        Ok(self.settle(
            OP,
            result,
            |report| {
                // an unreadable listing counts once
                self.metrics
                    .teardown_skipped(report.failed.len() + usize::from(report.listing_error.is_some()));
                if report.listing_error.is_some() {
                    ServiceResponse::ok("could not retrieve list of ConfigMaps in namespace")
                } else if report.failed.is_empty() {
                    ServiceResponse::ok("ConfigMaps deleted successfully")
                } else {
                    ServiceResponse::ok(format!(
                        "ConfigMaps deleted, could not remove [{}]",
                        report.failed.join(", ")
                    ))
                }
            },
            |e| ServiceResponse::failed(failure_message(e, "failed to delete ConfigMaps"), e),
        ))
    }

    pub async fn basic_auth_create_or_replace(
        &self,
        req: &InstanceCredentialsRequest,
    ) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "basic_auth_create_or_replace";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self
            .credentials
            .reconcile(&*self.cluster, &req.instance, &req.credentials)
            .await;
        Ok(self.settle(
            OP,
            result,
            |outcome| match outcome {
                Outcome::Created => ServiceResponse::ok("Secret created successfully"),
                Outcome::Updated => ServiceResponse::ok("Secret updated successfully"),
            },
            |e| ServiceResponse::failed("error while creating or updating secret", e),
        ))
    }

    pub async fn basic_auth_delete(&self, req: &InstanceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "basic_auth_delete";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.credentials.teardown(&*self.cluster, &req.deployment).await;
        Ok(self.settle(OP, result, removal_response, |e| {
            ServiceResponse::failed(failure_message(e, "error while removing secret"), e)
        }))
    }

    pub async fn cert_manager_delete(&self, req: &InstanceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "cert_manager_delete";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.credentials.delete_tls_secret(&*self.cluster, &req.deployment).await;
        Ok(self.settle(OP, result, removal_response, |e| {
            ServiceResponse::failed(failure_message(e, "error while removing secret"), e)
        }))
    }

    pub async fn check_if_ready(&self, req: &InstanceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "check_if_ready";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.status.evaluate(&*self.cluster, &req.deployment).await;
        Ok(self.settle(
            OP,
            result,
            |eval| ServiceResponse::new(eval.status.into(), eval.message, None),
            |e| ServiceResponse::failed("failed to determine readiness", e),
        ))
    }

    pub async fn retrieve_service_ip(&self, req: &InstanceRequest) -> Result<Answer<InfoServiceResponse>> {
        const OP: &str = "retrieve_service_ip";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = endpoint::service_ip(&*self.cluster, &req.deployment).await;
        Ok(self.settle(OP, result, InfoServiceResponse::ok, |e| {
            InfoServiceResponse::failed(failure_message(e, "failed to retrieve service IP"), e)
        }))
    }

    pub async fn check_service_exists(&self, req: &InstanceRequest) -> Result<Answer<InfoServiceResponse>> {
        const OP: &str = "check_service_exists";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = endpoint::service_exists(&*self.cluster, &req.deployment).await;
        Ok(self.settle(OP, result, InfoServiceResponse::ok, |e| {
            InfoServiceResponse::failed(failure_message(e, "failed to look up service"), e)
        }))
    }

    pub async fn retrieve_pod_list(&self, req: &InstanceRequest) -> Result<Answer<PodListResponse>> {
        const OP: &str = "retrieve_pod_list";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.inspector.list_pods(&*self.cluster, &req.deployment).await;
        Ok(self.settle(OP, result, PodListResponse::ok, |e| {
            PodListResponse::failed(failure_message(e, "issue with collecting pods"), e)
        }))
    }

    pub async fn retrieve_pod_logs(&self, req: &PodRequest) -> Result<Answer<PodLogsResponse>> {
        const OP: &str = "retrieve_pod_logs";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let result = self.inspector.get_logs(&*self.cluster, &req.deployment, &req.pod).await;
        Ok(self.settle(
            OP,
            result,
            |logs| PodLogsResponse::ok(vec![logs]),
            |e| PodLogsResponse::failed(failure_message(e, "issue with collecting logs"), e),
        ))
    }

    pub async fn create_namespace(&self, req: &NamespaceRequest) -> Result<Answer<ServiceResponse>> {
        const OP: &str = "create_namespace";
        let _timer = self.metrics.count_and_measure(OP);
        self.check(OP, &req.api)?;
        self.record(OP).await;

        let annotations: BTreeMap<String, String> = req
            .annotations
            .iter()
            .map(|a| (a.key.clone(), a.value.clone()))
            .collect();
        let result = namespace::create_namespace(&*self.cluster, &req.namespace, annotations).await;
        Ok(self.settle(
            OP,
            result,
            |()| ServiceResponse::ok(""),
            |e| ServiceResponse::failed("failed to create namespace", e),
        ))
    }
}

fn removal_response(removal: SecretRemoval) -> ServiceResponse {
    match removal {
        SecretRemoval::Deleted => ServiceResponse::ok("Secret deleted successfully"),
        SecretRemoval::Absent => ServiceResponse::ok("Secret does not exist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::{Credentials, Instance, NamespaceAnnotation, PodRef, Status};
    use crate::cluster::{ObjectData, ObjectKind, PodSummary, Workload, WorkloadKind};
    use crate::fixtures::{FixedSalt, MemoryCluster, MemorySource};
    use crate::source::ProjectId;

    fn service(cluster: MemoryCluster, source: MemorySource) -> (JanitorService, Arc<MemoryCluster>, State) {
        let cluster = Arc::new(cluster);
        let state = State::default();
        let service = state
            .to_service(cluster.clone(), Arc::new(source), UpdateStrategy::Replace, "master")
            .unwrap()
            .with_salt(Box::new(FixedSalt::new("xxxxxxxx")));
        (service, cluster, state)
    }

    fn source() -> MemorySource {
        MemorySource::new(ProjectId(1))
            .with_project("acme", "app1")
            .with_file("a.yaml", "x")
            .with_file("cfg/b.yaml", "y")
    }

    fn request(api: &str) -> InstanceRequest {
        InstanceRequest {
            api: api.to_string(),
            deployment: Instance::new("app1", "ns1", "acme"),
        }
    }

    #[tokio::test]
    async fn unsupported_version_has_no_envelope() {
        let (service, _, state) = service(MemoryCluster::new(), source());

        let err = service.check_if_ready(&request("v2")).await.unwrap_err();

        assert!(matches!(err.root(), StdError::UnsupportedVersion { .. }));
        assert_eq!(state.diagnostics().await.last_operation, None);
    }

    #[tokio::test]
    async fn config_create_reports_success() {
        let (service, cluster, _) = service(MemoryCluster::new(), source());

        let answer = service.config_create_or_replace(&request("v1")).await.unwrap();

        assert!(answer.error.is_none());
        assert_eq!(answer.body.status, Status::Ok);
        assert_eq!(cluster.objects(ObjectKind::ConfigMap, "ns1").len(), 2);
    }

    #[tokio::test]
    async fn config_create_with_unknown_project_fails_with_envelope() {
        let (service, _, _) = service(MemoryCluster::new(), MemorySource::new(ProjectId(1)));

        let answer = service.config_create_or_replace(&request("")).await.unwrap();

        assert_eq!(answer.body.status, Status::Failed);
        assert_eq!(answer.body.message, "cannot find corresponding GitLab project");
        assert!(answer.body.error.is_some());
        assert!(answer.error.unwrap().is_not_found());
    }

    #[tokio::test]
    async fn config_delete_is_ok_despite_failed_delete() {
        let cluster = MemoryCluster::new()
            .with_namespace("ns1")
            .with_object(ObjectKind::ConfigMap, "ns1", "app1", ObjectData::new())
            .with_object(ObjectKind::ConfigMap, "ns1", "app1-cfg", ObjectData::new())
            .with_failure("app1-cfg");
        let (service, cluster, _) = service(cluster, source());

        let answer = service.config_delete(&request("v1")).await.unwrap();

        assert!(answer.error.is_none());
        assert_eq!(answer.body.status, Status::Ok);
        assert!(cluster.object(ObjectKind::ConfigMap, "ns1", "app1").is_none());
        assert_eq!(service.metrics.teardown_skipped.get(), 1);
    }

    #[tokio::test]
    async fn config_delete_without_listing_counts_as_skipped() {
        let cluster = MemoryCluster::new()
            .with_namespace("ns1")
            .with_object(ObjectKind::ConfigMap, "ns1", "app1", ObjectData::new())
            .with_failure("ns1");
        let (service, cluster, _) = service(cluster, source());

        let answer = service.config_delete(&request("v1")).await.unwrap();

        assert!(answer.error.is_none());
        assert_eq!(answer.body.message, "could not retrieve list of ConfigMaps in namespace");
        assert!(cluster.object(ObjectKind::ConfigMap, "ns1", "app1").is_some());
        assert_eq!(service.metrics.teardown_skipped.get(), 1);
    }

    #[tokio::test]
    async fn readiness_answers_are_not_errors() {
        let (service, _, _) = service(MemoryCluster::new(), source());

        let answer = service.check_if_ready(&request("v1")).await.unwrap();

        assert!(answer.error.is_none());
        assert_eq!(answer.body.status, Status::Failed);
        assert_eq!(answer.body.message, "namespace not found");
    }

    #[tokio::test]
    async fn pending_deployment() {
        let cluster = MemoryCluster::new().with_namespace("ns1").with_workload(
            "ns1",
            "app1",
            Workload {
                kind: WorkloadKind::Deployment,
                desired_replicas: 3,
                ready_replicas: 2,
            },
        );
        let (service, _, _) = service(cluster, source());

        let answer = service.check_if_ready(&request("v1")).await.unwrap();

        assert_eq!(answer.body.status, Status::Pending);
        assert_eq!(answer.body.message, "waiting for deployment");
    }

    #[tokio::test]
    async fn basic_auth_create_then_update() {
        let (service, cluster, _) = service(MemoryCluster::new(), source());
        let req = InstanceCredentialsRequest {
            api: "v1".to_string(),
            instance: Instance::new("app1", "ns1", "acme"),
            credentials: Credentials {
                user: "admin".to_string(),
                password: "password".to_string(),
            },
        };

        let first = service.basic_auth_create_or_replace(&req).await.unwrap();
        let second = service.basic_auth_create_or_replace(&req).await.unwrap();

        assert_eq!(first.body.message, "Secret created successfully");
        assert_eq!(second.body.message, "Secret updated successfully");
        let secret = cluster.object(ObjectKind::Secret, "ns1", "app1-auth").unwrap();
        assert_eq!(secret["auth"], b"admin:$apr1$xxxxxxxx$dxHfLAsjHkDRmG83UXe8K0".to_vec());
    }

    #[tokio::test]
    async fn deleting_missing_secrets_succeeds() {
        let (service, _, _) = service(MemoryCluster::new().with_namespace("ns1"), source());

        let auth = service.basic_auth_delete(&request("v1")).await.unwrap();
        let tls = service.cert_manager_delete(&request("v1")).await.unwrap();

        assert_eq!(auth.body.message, "Secret does not exist");
        assert_eq!(tls.body.status, Status::Ok);
    }

    #[tokio::test]
    async fn service_ip_not_found_carries_reason() {
        let (service, _, _) = service(MemoryCluster::new().with_namespace("ns1"), source());

        let answer = service.retrieve_service_ip(&request("v1")).await.unwrap();

        assert_eq!(answer.body.status, Status::Failed);
        assert_eq!(answer.body.message, "service not found");
        assert_eq!(answer.body.info, "");
    }

    #[tokio::test]
    async fn pod_logs_are_returned_as_one_line_entry() {
        let cluster = MemoryCluster::new().with_namespace("ns1").with_pod(
            "ns1",
            PodSummary {
                name: "app1-0".to_string(),
                containers: vec!["app".to_string()],
            },
            "started\n",
        );
        let (service, _, _) = service(cluster, source());
        let req = PodRequest {
            api: "v1".to_string(),
            deployment: Instance::new("app1", "ns1", "acme"),
            pod: PodRef {
                name: "app1-0".to_string(),
                containers: vec![],
            },
        };

        let pods = service.retrieve_pod_list(&request("v1")).await.unwrap();
        let logs = service.retrieve_pod_logs(&req).await.unwrap();

        assert_eq!(pods.body.pods.len(), 1);
        assert_eq!(logs.body.lines, vec!["started\n".to_string()]);
    }

    #[tokio::test]
    async fn namespace_creation_copies_annotations() {
        let (service, cluster, state) = service(MemoryCluster::new(), source());
        let req = NamespaceRequest {
            api: "v1".to_string(),
            namespace: "tenant-a".to_string(),
            annotations: vec![NamespaceAnnotation {
                key: "owner".to_string(),
                value: "acme".to_string(),
            }],
        };

        let answer = service.create_namespace(&req).await.unwrap();

        assert_eq!(answer.body.status, Status::Ok);
        let (_, annotations) = cluster.namespace("tenant-a").unwrap();
        assert_eq!(annotations.get("owner").map(String::as_str), Some("acme"));
        assert_eq!(state.diagnostics().await.last_operation.as_deref(), Some("create_namespace"));
    }

    #[tokio::test]
    async fn operations_and_failures_are_counted() {
        let (service, _, state) = service(MemoryCluster::new(), source());

        service.retrieve_pod_list(&request("v1")).await.unwrap();

        assert_eq!(service.metrics.operations.with_label_values(&["retrieve_pod_list"]).get(), 1);
        assert_eq!(
            service
                .metrics
                .failures
                .with_label_values(&["retrieve_pod_list", "not_found"])
                .get(),
            1
        );
        assert!(state.metrics().iter().any(|m| m.get_name() == "janitor_operations_total"));
    }
}
