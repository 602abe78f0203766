use actix_web::{http::StatusCode, post, web, web::Data, HttpResponse};
use serde::Serialize;
use tracing::error;

use janitor::api::v1::{InstanceCredentialsRequest, InstanceRequest, NamespaceRequest, PodRequest};
use janitor::service::{Answer, JanitorService};
use janitor::util::errors::{Error, Result, StdError};

fn status_code(e: &Error) -> StatusCode {
    if let Error::PartialFailure(_) = e {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match e.root() {
        StdError::NotFound(_) | StdError::AmbiguousSource(_) => StatusCode::NOT_FOUND,
        StdError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        StdError::UnsupportedVersion { .. } => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The envelope with a status code matching its error, or a plain error body
/// when the request was rejected before producing one.
fn respond<T: Serialize>(result: Result<Answer<T>>) -> HttpResponse {
    match result {
        Ok(answer) => {
            let status = answer.error.as_ref().map_or(StatusCode::OK, status_code);
            HttpResponse::build(status).json(answer.body)
        }
        Err(e) => {
            error!("Rejected request: {}", e);
            HttpResponse::build(status_code(&e))
                .content_type("text/plain; charset=utf-8")
                .body(e.root().to_string())
        }
    }
}

#[post("/v1/config/create-or-replace")]
pub async fn config_create_or_replace(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.config_create_or_replace(&req).await)
}

#[post("/v1/config/delete")]
pub async fn config_delete(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.config_delete(&req).await)
}

#[post("/v1/basic-auth/create-or-replace")]
pub async fn basic_auth_create_or_replace(
    svc: Data<JanitorService>,
    req: web::Json<InstanceCredentialsRequest>,
) -> HttpResponse {
    respond(svc.basic_auth_create_or_replace(&req).await)
}

#[post("/v1/basic-auth/delete")]
pub async fn basic_auth_delete(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.basic_auth_delete(&req).await)
}

#[post("/v1/cert-manager/delete")]
pub async fn cert_manager_delete(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.cert_manager_delete(&req).await)
}

#[post("/v1/readiness/check")]
pub async fn check_if_ready(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.check_if_ready(&req).await)
}

#[post("/v1/information/service-ip")]
pub async fn retrieve_service_ip(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.retrieve_service_ip(&req).await)
}

#[post("/v1/information/service-exists")]
pub async fn check_service_exists(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.check_service_exists(&req).await)
}

#[post("/v1/pods/list")]
pub async fn retrieve_pod_list(svc: Data<JanitorService>, req: web::Json<InstanceRequest>) -> HttpResponse {
    respond(svc.retrieve_pod_list(&req).await)
}

#[post("/v1/pods/logs")]
pub async fn retrieve_pod_logs(svc: Data<JanitorService>, req: web::Json<PodRequest>) -> HttpResponse {
    respond(svc.retrieve_pod_logs(&req).await)
}

#[post("/v1/namespaces/create")]
pub async fn create_namespace(svc: Data<JanitorService>, req: web::Json<NamespaceRequest>) -> HttpResponse {
    respond(svc.create_namespace(&req).await)
}
