use rand::{rngs::OsRng, Rng};
use std::collections::BTreeMap;
use tracing::info;

use super::namespace::{ensure_namespace, require_namespace};
use super::naming::{auth_secret_name, tls_secret_name};
use super::object::{ObjectReconciler, Outcome, UpdateStrategy};
use crate::api::{Credentials, Instance};
use crate::cluster::{ClusterStore, ObjectData, ObjectKind};
use crate::util::errors::Result;
use crate::util::htpasswd::{apr1, ALPHABET};

/// Key of the htpasswd line inside the auth secret.
pub const AUTH_KEY: &str = "auth";

const SALT_LEN: usize = 8;

/// Produces the per-call salt for credential hashing.
pub trait SaltSource: Send + Sync {
    fn salt(&self) -> String;
}

/// Salt drawn from the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngSalt;

impl SaltSource for OsRngSalt {
    fn salt(&self) -> String {
        (0..SALT_LEN)
            .map(|_| ALPHABET[OsRng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRemoval {
    Deleted,
    /// Nothing to delete
    Absent,
}

/// Manages the basic-auth secret of an instance and removes its TLS secret.
pub struct CredentialReconciler {
    objects: ObjectReconciler,
    salt: Box<dyn SaltSource>,
}

impl Default for CredentialReconciler {
    fn default() -> Self {
        Self::new(Box::new(OsRngSalt))
    }
}

impl CredentialReconciler {
    pub fn new(salt: Box<dyn SaltSource>) -> Self {
        Self {
            objects: ObjectReconciler::new(ObjectKind::Secret, UpdateStrategy::MergePatch),
            salt,
        }
    }

    /// `user:$apr1$<salt>$<digest>` with a fresh salt.
    pub fn hash_secret_payload(&self, credentials: &Credentials) -> Vec<u8> {
        let hash = apr1(&credentials.password, &self.salt.salt());
        format!("{}:{}", credentials.user, hash).into_bytes()
    }

    /// Create the auth secret, or merge a fresh hash into it, keeping any other keys.
    pub async fn reconcile(
        &self,
        store: &dyn ClusterStore,
        instance: &Instance,
        credentials: &Credentials,
    ) -> Result<Outcome> {
        ensure_namespace(store, &instance.namespace).await?;

        let name = auth_secret_name(&instance.uid);
        let data: ObjectData = BTreeMap::from([(AUTH_KEY.to_string(), self.hash_secret_payload(credentials))]);
        let outcome = self.objects.apply(store, &instance.namespace, &name, &data).await?;
        info!("Secret {}/{} {:?}", instance.namespace, name, outcome);
        Ok(outcome)
    }

    /// Delete the auth secret. A missing secret counts as success.
    pub async fn teardown(&self, store: &dyn ClusterStore, instance: &Instance) -> Result<SecretRemoval> {
        delete_secret(store, &instance.namespace, &auth_secret_name(&instance.uid)).await
    }

    /// Delete the certificate secret issued for the instance.
    pub async fn delete_tls_secret(&self, store: &dyn ClusterStore, instance: &Instance) -> Result<SecretRemoval> {
        delete_secret(store, &instance.namespace, &tls_secret_name(&instance.uid)).await
    }
}

async fn delete_secret(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<SecretRemoval> {
    require_namespace(store, namespace).await?;

    if store.get_object(ObjectKind::Secret, namespace, name).await?.is_none() {
        info!("Secret {}/{} does not exist", namespace, name);
        return Ok(SecretRemoval::Absent);
    }

    match store.delete_object(ObjectKind::Secret, namespace, name).await {
        Ok(()) => Ok(SecretRemoval::Deleted),
        Err(e) if e.is_not_found() => Ok(SecretRemoval::Absent),
        Err(e) => Err(e),
    }
}
