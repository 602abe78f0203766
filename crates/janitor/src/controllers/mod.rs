/// Config objects mirroring the source tree
pub mod config;
/// Basic-auth and TLS secrets
pub mod credentials;
pub mod endpoint;
pub mod inspector;
pub mod namespace;
pub mod naming;
/// Generic create-or-update
pub mod object;
/// Readiness
pub mod status;

pub use config::{ConfigReconciler, TeardownReport};
pub use credentials::{CredentialReconciler, OsRngSalt, SaltSource, SecretRemoval};
pub use inspector::InstanceInspector;
pub use object::{ObjectReconciler, Outcome, UpdateStrategy};
pub use status::{Evaluation, InstanceStatus, StatusEvaluator};
