use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::cluster::{ClusterStore, ObjectData, ObjectKind, ObjectPatch};
use crate::util::errors::{Error, Result, StdError};

/// How an object that already exists is brought to the desired payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Overwrite the whole object
    Replace,
    /// Merge the desired keys into the existing payload, keeping unrelated keys
    MergePatch,
    /// Rewrite the payload fields wholesale through JSON patch operations
    JsonPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
}

/// Idempotent create-or-update of one kind of key/value object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectReconciler {
    kind: ObjectKind,
    strategy: UpdateStrategy,
}

impl ObjectReconciler {
    pub fn new(kind: ObjectKind, strategy: UpdateStrategy) -> Self {
        Self { kind, strategy }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Create `name` with `data`, or update it in place when it already exists.
    ///
    /// A create that loses a race with another writer falls through to the
    /// update path.
    pub async fn apply(
        &self,
        store: &dyn ClusterStore,
        namespace: &str,
        name: &str,
        data: &ObjectData,
    ) -> Result<Outcome> {
        if store.get_object(self.kind, namespace, name).await?.is_none() {
            match store.create_object(self.kind, namespace, name, data).await {
                Ok(()) => return Ok(Outcome::Created),
                Err(e) if e.is_already_exists() => {
                    info!("{} '{}' appeared concurrently, updating instead", self.kind, name);
                }
                Err(e) => return Err(e),
            }
        }

        self.update(store, namespace, name, data).await?;
        Ok(Outcome::Updated)
    }

    async fn update(&self, store: &dyn ClusterStore, namespace: &str, name: &str, data: &ObjectData) -> Result<()> {
        match self.strategy {
            UpdateStrategy::Replace => store.replace_object(self.kind, namespace, name, data).await,
            UpdateStrategy::MergePatch => {
                let patch = ObjectPatch::Merge(merge_patch(self.kind, data));
                store.patch_object(self.kind, namespace, name, &patch).await
            }
            UpdateStrategy::JsonPatch => {
                let patch = ObjectPatch::Json(json_patch(self.kind, data)?);
                store.patch_object(self.kind, namespace, name, &patch).await
            }
        }
    }
}

/// The payload fields of an object as they appear in its JSON representation.
///
/// Secrets carry every value base64 encoded under `data`. ConfigMaps keep
/// UTF-8 values as plain strings under `data` and the rest base64 encoded
/// under `binaryData`.
pub(crate) fn payload_fields(kind: ObjectKind, data: &ObjectData) -> Map<String, Value> {
    let mut fields = Map::new();
    match kind {
        ObjectKind::Secret => {
            let encoded: Map<String, Value> = data
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(STANDARD.encode(v))))
                .collect();
            fields.insert("data".to_string(), Value::Object(encoded));
        }
        ObjectKind::ConfigMap => {
            let mut text = Map::new();
            let mut binary = Map::new();
            for (k, v) in data {
                match std::str::from_utf8(v) {
                    Ok(s) => text.insert(k.clone(), Value::String(s.to_string())),
                    Err(_) => binary.insert(k.clone(), Value::String(STANDARD.encode(v))),
                };
            }
            fields.insert("binaryData".to_string(), Value::Object(binary));
            fields.insert("data".to_string(), Value::Object(text));
        }
    }
    fields
}

/// RFC 7386 document setting every key of `data`.
pub fn merge_patch(kind: ObjectKind, data: &ObjectData) -> Value {
    let mut fields = payload_fields(kind, data);
    if matches!(fields.get("binaryData"), Some(Value::Object(m)) if m.is_empty()) {
        fields.remove("binaryData");
    }
    Value::Object(fields)
}

/// RFC 6902 operations replacing the payload fields with `data`.
pub fn json_patch(kind: ObjectKind, data: &ObjectData) -> Result<json_patch::Patch> {
    let ops: Vec<Value> = payload_fields(kind, data)
        .into_iter()
        .map(|(field, value)| json!({"op": "add", "path": format!("/{field}"), "value": value}))
        .collect();
    serde_json::from_value(Value::Array(ops)).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))
}
