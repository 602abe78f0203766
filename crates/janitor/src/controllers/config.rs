use tracing::{info, warn};

use super::namespace::{ensure_namespace, require_namespace};
use super::naming::{belongs_to_instance, is_valid_object_name, object_name};
use super::object::{ObjectReconciler, UpdateStrategy};
use crate::api::Instance;
use crate::cluster::{ClusterStore, ObjectData, ObjectKind};
use crate::source::{flatten, SourceTree};
use crate::util::errors::{Error, PartialFailure, Result, StdError};

/// What a best-effort teardown managed to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    /// Objects whose deletion failed and were skipped
    pub failed: Vec<String>,
    /// Set when the objects of the namespace could not be listed at all
    pub listing_error: Option<String>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.listing_error.is_none()
    }
}

/// Keeps the config objects of an instance in line with its source tree.
pub struct ConfigReconciler {
    objects: ObjectReconciler,
    revision: String,
}

impl ConfigReconciler {
    /// `revision` is the source revision every file is read at.
    pub fn new(strategy: UpdateStrategy, revision: impl Into<String>) -> Self {
        Self {
            objects: ObjectReconciler::new(ObjectKind::ConfigMap, strategy),
            revision: revision.into(),
        }
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Create or update one config object per group of the instance's source
    /// tree, returning the names written in order.
    ///
    /// Every object name is validated before the first write. The pass is not
    /// transactional: a failure after some groups were written is reported as a
    /// [`PartialFailure`] and leaves those groups in place. Objects of groups
    /// that disappeared from the source are left alone.
    pub async fn reconcile(
        &self,
        store: &dyn ClusterStore,
        source: &dyn SourceTree,
        instance: &Instance,
    ) -> Result<Vec<String>> {
        let project = source.resolve_project(&instance.domain, &instance.uid).await?;
        info!("Instance {} resolved to source project {}", instance.uid, project);

        ensure_namespace(store, &instance.namespace).await?;

        let tree = flatten(source, project, &self.revision).await?;

        let mut planned: Vec<(String, ObjectData)> = Vec::with_capacity(tree.len());
        for (group, files) in tree.groups() {
            let name = object_name(&instance.uid, group);
            if !is_valid_object_name(&name) {
                return Err(Error::StdError(StdError::InvalidArgument(format!(
                    "group '{group}' yields invalid object name '{name}'"
                ))));
            }
            planned.push((name, files.clone()));
        }

        let mut applied = Vec::with_capacity(planned.len());
        for (name, data) in planned {
            match self.objects.apply(store, &instance.namespace, &name, &data).await {
                Ok(outcome) => {
                    info!("ConfigMap {}/{} {:?}", instance.namespace, name, outcome);
                    applied.push(name);
                }
                Err(e) if applied.is_empty() => return Err(e),
                Err(Error::StdError(e)) => {
                    return Err(Error::PartialFailure(PartialFailure::new(applied, name, e)));
                }
                Err(e @ Error::PartialFailure(_)) => return Err(e),
            }
        }

        Ok(applied)
    }

    /// Delete every config object belonging to the instance.
    ///
    /// The namespace must exist. Individual delete failures are logged and
    /// skipped, and a namespace whose objects cannot be listed is reported in
    /// the returned report rather than as an error.
    pub async fn teardown(&self, store: &dyn ClusterStore, instance: &Instance) -> Result<TeardownReport> {
        require_namespace(store, &instance.namespace).await?;

        let mut report = TeardownReport::default();
        let names = match store.list_objects(ObjectKind::ConfigMap, &instance.namespace).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Could not list ConfigMaps in namespace {}: {}", instance.namespace, e);
                report.listing_error = Some(e.to_string());
                return Ok(report);
            }
        };

        for name in names.into_iter().filter(|n| belongs_to_instance(&instance.uid, n)) {
            info!("Deleting ConfigMap {}/{}", instance.namespace, name);
            match store.delete_object(ObjectKind::ConfigMap, &instance.namespace, &name).await {
                Ok(()) => report.deleted.push(name),
                Err(e) => {
                    warn!("Failed to delete ConfigMap {}/{}: {}", instance.namespace, name, e);
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }
}
