use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::cluster::ClusterStore;
use crate::util::errors::{Error, Result, StdError};

pub const NAMESPACE_NOT_FOUND: &str = "namespace not found";

/// Create `namespace` if it does not exist yet.
///
/// Losing a creation race to another writer counts as success.
pub async fn ensure_namespace(store: &dyn ClusterStore, namespace: &str) -> Result<()> {
    if store.namespace_exists(namespace).await? {
        return Ok(());
    }

    info!("Creating namespace {}", namespace);
    match store.create_namespace(namespace, BTreeMap::new(), BTreeMap::new()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => {
            debug!("Namespace {} was created concurrently", namespace);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Fail with `NotFound` unless `namespace` exists.
pub async fn require_namespace(store: &dyn ClusterStore, namespace: &str) -> Result<()> {
    if store.namespace_exists(namespace).await? {
        Ok(())
    } else {
        Err(Error::StdError(StdError::NotFound(NAMESPACE_NOT_FOUND.to_string())))
    }
}

/// Create a tenant namespace labelled `name=<namespace>` with the given annotations.
pub async fn create_namespace(
    store: &dyn ClusterStore,
    namespace: &str,
    annotations: BTreeMap<String, String>,
) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::StdError(StdError::InvalidArgument(
            "namespace name must not be empty".to_string(),
        )));
    }
    let labels = BTreeMap::from([("name".to_string(), namespace.to_string())]);
    info!("Creating namespace {} with {} annotations", namespace, annotations.len());
    store.create_namespace(namespace, labels, annotations).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemoryCluster;

    #[tokio::test]
    async fn ensure_creates_missing_namespace_once() {
        let store = MemoryCluster::new();

        ensure_namespace(&store, "ns1").await.unwrap();
        ensure_namespace(&store, "ns1").await.unwrap();

        assert!(store.namespace_exists("ns1").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_tolerates_losing_a_creation_race() {
        let store = MemoryCluster::new().with_create_race("ns1");

        ensure_namespace(&store, "ns1").await.unwrap();

        assert!(store.namespace_exists("ns1").await.unwrap());
    }

    #[tokio::test]
    async fn require_reports_missing_namespace() {
        let store = MemoryCluster::new();

        let err = require_namespace(&store, "ns1").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.root().to_string(), "NotFound: namespace not found");
    }

    #[tokio::test]
    async fn created_namespace_is_labelled_and_annotated() {
        let store = MemoryCluster::new();
        let annotations = BTreeMap::from([("owner".to_string(), "acme".to_string())]);

        create_namespace(&store, "tenant-a", annotations.clone()).await.unwrap();

        let (labels, stored) = store.namespace("tenant-a").unwrap();
        assert_eq!(labels.get("name").map(String::as_str), Some("tenant-a"));
        assert_eq!(stored, annotations);
    }

    #[tokio::test]
    async fn creating_an_existing_namespace_fails() {
        let store = MemoryCluster::new().with_namespace("tenant-a");

        let err = create_namespace(&store, "tenant-a", BTreeMap::new()).await.unwrap_err();

        assert!(err.is_already_exists());
    }
}
