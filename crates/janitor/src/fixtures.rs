//! In-memory collaborators for tests.
//!
//! [`MemoryCluster`] and [`MemorySource`] follow the observable semantics of
//! the Kubernetes and GitLab backed implementations closely enough for the
//! reconcilers to be exercised without a cluster or a GitLab instance.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cluster::{ClusterStore, ObjectData, ObjectKind, ObjectPatch, PodSummary, ServiceSummary, Workload, WorkloadKind};
use crate::controllers::credentials::SaltSource;
use crate::controllers::object::payload_fields;
use crate::source::{ProjectId, SourceTree, TreeEntry};
use crate::util::errors::{Error, Result, StdError};

type Labels = BTreeMap<String, String>;
type ObjectKey = (ObjectKind, String, String);

fn not_found(what: String) -> Error {
    Error::StdError(StdError::NotFound(what))
}

fn injected(name: &str) -> Error {
    Error::StdError(StdError::IoError(format!("injected failure for {name}")))
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, (Labels, Labels)>,
    objects: BTreeMap<ObjectKey, ObjectData>,
    workloads: Vec<(String, String, Workload)>,
    services: BTreeMap<(String, String), ServiceSummary>,
    pods: BTreeMap<(String, String), (PodSummary, String)>,
    failures: BTreeSet<String>,
    create_races: BTreeSet<String>,
    log_requests: Vec<(String, Option<String>)>,
}

impl ClusterState {
    fn check(&self, name: &str) -> Result<()> {
        if self.failures.contains(name) {
            Err(injected(name))
        } else {
            Ok(())
        }
    }

    /// True once, for the first create of a name registered as racing.
    fn lose_race(&mut self, name: &str) -> bool {
        self.create_races.remove(name)
    }
}

/// A [`ClusterStore`] held in memory.
///
/// Names registered with [`MemoryCluster::with_failure`] make every mutation,
/// workload, service and log operation on an object of that name fail, and
/// make listings of a namespace of that name fail. Existence checks never fail.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with(mut self, f: impl FnOnce(&mut ClusterState)) -> Self {
        f(self.state.get_mut().unwrap_or_else(PoisonError::into_inner));
        self
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.with(|s| {
            s.namespaces.insert(namespace.to_string(), Default::default());
        })
    }

    pub fn with_object(self, kind: ObjectKind, namespace: &str, name: &str, data: ObjectData) -> Self {
        self.with(|s| {
            s.objects.insert((kind, namespace.to_string(), name.to_string()), data);
        })
    }

    pub fn with_workload(self, namespace: &str, name: &str, workload: Workload) -> Self {
        self.with(|s| s.workloads.push((namespace.to_string(), name.to_string(), workload)))
    }

    pub fn with_service(self, namespace: &str, service: ServiceSummary) -> Self {
        self.with(|s| {
            s.services.insert((namespace.to_string(), service.name.clone()), service);
        })
    }

    pub fn with_pod(self, namespace: &str, pod: PodSummary, logs: &str) -> Self {
        self.with(|s| {
            s.pods.insert((namespace.to_string(), pod.name.clone()), (pod, logs.to_string()));
        })
    }

    pub fn with_failure(self, name: &str) -> Self {
        self.with(|s| {
            s.failures.insert(name.to_string());
        })
    }

    /// The first create of `name` finds it already created by someone else.
    pub fn with_create_race(self, name: &str) -> Self {
        self.with(|s| {
            s.create_races.insert(name.to_string());
        })
    }

    pub fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<ObjectData> {
        self.lock()
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every object of `kind` in `namespace`, by name.
    pub fn objects(&self, kind: ObjectKind, namespace: &str) -> BTreeMap<String, ObjectData> {
        self.lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|((_, _, name), data)| (name.clone(), data.clone()))
            .collect()
    }

    /// Labels and annotations of a namespace.
    pub fn namespace(&self, namespace: &str) -> Option<(Labels, Labels)> {
        self.lock().namespaces.get(namespace).cloned()
    }

    /// Add a key to an existing object behind the reconcilers' back.
    pub fn insert_key(&self, kind: ObjectKind, namespace: &str, name: &str, key: &str, value: &[u8]) {
        if let Some(data) = self
            .lock()
            .objects
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
        {
            data.insert(key.to_string(), value.to_vec());
        }
    }

    /// Pod and container of every log request, in order.
    pub fn log_requests(&self) -> Vec<(String, Option<String>)> {
        self.lock().log_requests.clone()
    }
}

/// Decode payload fields in their JSON form back into raw bytes.
fn decode_fields(kind: ObjectKind, fields: &Map<String, Value>) -> Result<ObjectData> {
    let mut data = ObjectData::new();
    for (field, values) in fields {
        let Value::Object(values) = values else { continue };
        for (key, value) in values {
            data.insert(key.clone(), decode_value(kind, field, value)?);
        }
    }
    Ok(data)
}

fn decode_value(kind: ObjectKind, field: &str, value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::StdError(StdError::SerializationError(format!("non-string value in {field}"))))?;
    if kind == ObjectKind::ConfigMap && field == "data" {
        return Ok(text.as_bytes().to_vec());
    }
    STANDARD
        .decode(text)
        .map_err(|e| Error::StdError(StdError::SerializationError(format!("invalid base64 in {field}: {e}"))))
}

fn apply_patch(kind: ObjectKind, current: &ObjectData, patch: &ObjectPatch) -> Result<ObjectData> {
    match patch {
        ObjectPatch::Merge(doc) => {
            let mut merged = current.clone();
            let Some(fields) = doc.as_object() else {
                return Err(Error::StdError(StdError::InvalidArgument(
                    "merge patch must be an object".to_string(),
                )));
            };
            for (field, values) in fields {
                let Value::Object(values) = values else { continue };
                for (key, value) in values {
                    if value.is_null() {
                        merged.remove(key);
                    } else {
                        merged.insert(key.clone(), decode_value(kind, field, value)?);
                    }
                }
            }
            Ok(merged)
        }
        ObjectPatch::Json(ops) => {
            let mut doc = Value::Object(payload_fields(kind, current));
            json_patch::patch(&mut doc, &ops.0)
                .map_err(|e| Error::StdError(StdError::InvalidArgument(format!("json patch failed: {e}"))))?;
            match doc {
                Value::Object(fields) => decode_fields(kind, &fields),
                _ => Ok(ObjectData::new()),
            }
        }
    }
}

#[async_trait]
impl ClusterStore for MemoryCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.lock().namespaces.contains_key(namespace))
    }

    async fn create_namespace(&self, namespace: &str, labels: Labels, annotations: Labels) -> Result<()> {
        let mut state = self.lock();
        if state.lose_race(namespace) {
            state.namespaces.insert(namespace.to_string(), Default::default());
        }
        if state.namespaces.contains_key(namespace) {
            return Err(Error::StdError(StdError::AlreadyExists(format!("namespace {namespace}"))));
        }
        state.namespaces.insert(namespace.to_string(), (labels, annotations));
        Ok(())
    }

    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<ObjectData>> {
        Ok(self.object(kind, namespace, name))
    }

    async fn create_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()> {
        let mut state = self.lock();
        state.check(name)?;
        if !state.namespaces.contains_key(namespace) {
            return Err(not_found(format!("namespace {namespace}")));
        }
        let key = (kind, namespace.to_string(), name.to_string());
        if state.lose_race(name) {
            state.objects.insert(key.clone(), ObjectData::new());
        }
        if state.objects.contains_key(&key) {
            return Err(Error::StdError(StdError::AlreadyExists(format!("{kind} {name}"))));
        }
        state.objects.insert(key, data.clone());
        Ok(())
    }

    async fn replace_object(&self, kind: ObjectKind, namespace: &str, name: &str, data: &ObjectData) -> Result<()> {
        let mut state = self.lock();
        state.check(name)?;
        match state.objects.get_mut(&(kind, namespace.to_string(), name.to_string())) {
            Some(existing) => {
                *existing = data.clone();
                Ok(())
            }
            None => Err(not_found(format!("{kind} {name}"))),
        }
    }

    async fn patch_object(&self, kind: ObjectKind, namespace: &str, name: &str, patch: &ObjectPatch) -> Result<()> {
        let mut state = self.lock();
        state.check(name)?;
        let Some(existing) = state.objects.get_mut(&(kind, namespace.to_string(), name.to_string())) else {
            return Err(not_found(format!("{kind} {name}")));
        };
        *existing = apply_patch(kind, existing, patch)?;
        Ok(())
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(name)?;
        state
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(format!("{kind} {name}")))
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<String>> {
        self.lock().check(namespace)?;
        Ok(self.objects(kind, namespace).into_keys().collect())
    }

    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Option<Workload>> {
        let state = self.lock();
        state.check(name)?;
        Ok(state
            .workloads
            .iter()
            .find(|(ns, n, w)| ns == namespace && n == name && w.kind == kind)
            .map(|(_, _, w)| *w))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceSummary>> {
        let state = self.lock();
        state.check(name)?;
        Ok(state.services.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        let state = self.lock();
        state.check(namespace)?;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, (pod, _))| pod.clone())
            .collect())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.lock().pods.contains_key(&(namespace.to_string(), name.to_string())))
    }

    async fn pod_logs(&self, namespace: &str, name: &str, container: Option<&str>) -> Result<String> {
        let mut state = self.lock();
        state.log_requests.push((name.to_string(), container.map(str::to_string)));
        state.check(name)?;
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|(_, logs)| logs.clone())
            .ok_or_else(|| not_found(format!("pod {name}")))
    }
}

/// A [`SourceTree`] serving one project from a flat list of file paths.
pub struct MemorySource {
    project: ProjectId,
    owners: BTreeSet<(String, String)>,
    ambiguous_domains: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    unreadable: BTreeSet<String>,
    revision: Option<String>,
    revisions: Mutex<Vec<String>>,
    listings: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            owners: BTreeSet::new(),
            ambiguous_domains: BTreeSet::new(),
            files: BTreeMap::new(),
            unreadable: BTreeSet::new(),
            revision: None,
            revisions: Mutex::new(Vec::new()),
            listings: Mutex::new(Vec::new()),
        }
    }

    /// Resolve `(domain, uid)` to this source's project.
    pub fn with_project(mut self, domain: &str, uid: &str) -> Self {
        self.owners.insert((domain.to_string(), uid.to_string()));
        self
    }

    /// Several groups match `domain`.
    pub fn with_ambiguous_domain(mut self, domain: &str) -> Self {
        self.ambiguous_domains.insert(domain.to_string());
        self
    }

    pub fn with_file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.to_string(), content.as_ref().to_vec());
        self
    }

    /// Listed, but every read of `path` fails.
    pub fn with_unreadable(mut self, path: &str) -> Self {
        self.unreadable.insert(path.to_string());
        self
    }

    /// Only `revision` exists; listing any other one is a `NotFound`.
    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    /// Revision of every file read so far, in order.
    pub fn revisions_read(&self) -> Vec<String> {
        self.revisions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Revision of every tree listing so far, in order.
    pub fn revisions_listed(&self) -> Vec<String> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn check_revision(&self, revision: &str) -> Result<()> {
        match &self.revision {
            Some(known) if known != revision => Err(not_found(format!("revision {revision}"))),
            _ => Ok(()),
        }
    }

    fn check_project(&self, project: ProjectId) -> Result<()> {
        if project == self.project {
            Ok(())
        } else {
            Err(not_found(format!("project {project}")))
        }
    }
}

#[async_trait]
impl SourceTree for MemorySource {
    async fn resolve_project(&self, domain: &str, uid: &str) -> Result<ProjectId> {
        if self.ambiguous_domains.contains(domain) {
            return Err(Error::StdError(StdError::AmbiguousSource(format!(
                "several groups match domain {domain}"
            ))));
        }
        if self.owners.contains(&(domain.to_string(), uid.to_string())) {
            Ok(self.project)
        } else {
            Err(not_found(format!("project for {domain}/{uid}")))
        }
    }

    async fn list_tree(
        &self,
        project: ProjectId,
        path: Option<&str>,
        recursive: bool,
        revision: &str,
    ) -> Result<Vec<TreeEntry>> {
        self.check_project(project)?;
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(revision.to_string());
        self.check_revision(revision)?;
        let prefix = path.map(|p| format!("{p}/")).unwrap_or_default();

        let mut blobs = BTreeSet::new();
        let mut trees = BTreeSet::new();
        for file in self.files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else { continue };
            let parts: Vec<&str> = rest.split('/').collect();
            if recursive {
                for depth in 1..parts.len() {
                    trees.insert(format!("{prefix}{}", parts[..depth].join("/")));
                }
                blobs.insert(file.clone());
            } else if parts.len() > 1 {
                trees.insert(format!("{prefix}{}", parts[0]));
            } else {
                blobs.insert(file.clone());
            }
        }

        if path.is_some() && blobs.is_empty() && trees.is_empty() {
            return Err(not_found(format!("tree {prefix}")));
        }

        Ok(trees
            .iter()
            .map(|t| TreeEntry::tree(t))
            .chain(blobs.iter().map(|b| TreeEntry::blob(b)))
            .collect())
    }

    async fn read_file(&self, project: ProjectId, path: &str, revision: &str) -> Result<Vec<u8>> {
        self.check_project(project)?;
        self.revisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(revision.to_string());
        self.check_revision(revision)?;
        if self.unreadable.contains(path) {
            return Err(Error::StdError(StdError::IoError(format!("cannot read {path}"))));
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(format!("file {path}")))
    }
}

/// Always hands out the same salt.
#[derive(Debug, Clone)]
pub struct FixedSalt(String);

impl FixedSalt {
    pub fn new(salt: &str) -> Self {
        Self(salt.to_string())
    }
}

impl SaltSource for FixedSalt {
    fn salt(&self) -> String {
        self.0.clone()
    }
}
