use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::util::settings::LogFormat;

/// Initialize tracing
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Setup tracing layers
    let result = match format {
        LogFormat::Text => {
            let logger = tracing_subscriber::fmt::layer().compact();
            tracing::subscriber::set_global_default(Registry::default().with(logger).with(env_filter))
        }
        LogFormat::Json => {
            let logger = tracing_subscriber::fmt::layer().json();
            tracing::subscriber::set_global_default(Registry::default().with(logger).with(env_filter))
        }
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}
