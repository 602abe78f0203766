use tracing::info;

use super::namespace::require_namespace;
use crate::api::Instance;
use crate::cluster::{ClusterStore, ServiceSummary};
use crate::util::errors::{Error, Result, StdError};

fn not_found(what: &str) -> Error {
    Error::StdError(StdError::NotFound(what.to_string()))
}

async fn instance_service(store: &dyn ClusterStore, instance: &Instance) -> Result<ServiceSummary> {
    require_namespace(store, &instance.namespace).await?;
    store
        .get_service(&instance.namespace, &instance.uid)
        .await?
        .ok_or_else(|| not_found("service not found"))
}

/// External IP of the instance's load-balancer service.
pub async fn service_ip(store: &dyn ClusterStore, instance: &Instance) -> Result<String> {
    let service = instance_service(store, instance).await?;
    match service.ingress_ips.first() {
        Some(ip) if !ip.is_empty() => {
            info!("Service {}/{} is exposed at {}", instance.namespace, service.name, ip);
            Ok(ip.clone())
        }
        Some(_) => Err(not_found("ip not found")),
        None => Err(not_found("service ingress not found")),
    }
}

/// Name of the instance's service, when it exists.
pub async fn service_exists(store: &dyn ClusterStore, instance: &Instance) -> Result<String> {
    Ok(instance_service(store, instance).await?.name)
}
