pub mod errors;
pub mod htpasswd;
pub mod metrics;
pub mod settings;
pub mod telemetry;
