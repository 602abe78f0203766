//! Process settings loaded from environment variables.

use tracing::warn;

use crate::controllers::object::UpdateStrategy;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_GITLAB_API_URL: &str = "http://gitlab-webservice-default.nmaas-system:8181/api/v4";
pub const DEFAULT_GITLAB_REF: &str = "master";
pub const DEFAULT_GITLAB_PROJECT_PREFIX: &str = "groups-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Settings for the janitor process
///
/// Every field has a default and can be overridden through the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Base URL of the GitLab REST API, including the `/api/v4` suffix
    pub gitlab_api_url: String,
    /// Access token sent as `PRIVATE-TOKEN`
    pub gitlab_token: Option<String>,
    /// Revision every configuration file is read at
    pub gitlab_ref: String,
    /// Prefix of the group path a tenant domain maps to
    pub gitlab_project_prefix: String,
    /// How existing config objects are rewritten
    pub config_update_strategy: UpdateStrategy,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            gitlab_api_url: DEFAULT_GITLAB_API_URL.to_string(),
            gitlab_token: None,
            gitlab_ref: DEFAULT_GITLAB_REF.to_string(),
            gitlab_project_prefix: DEFAULT_GITLAB_PROJECT_PREFIX.to_string(),
            config_update_strategy: UpdateStrategy::Replace,
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        // config objects are never merged
        let config_update_strategy = match lookup("CONFIG_UPDATE_STRATEGY").as_deref() {
            None | Some("replace") => UpdateStrategy::Replace,
            Some("json-patch") => UpdateStrategy::JsonPatch,
            Some(other) => {
                warn!(
                    "Unrecognised CONFIG_UPDATE_STRATEGY '{}', using {:?}",
                    other, defaults.config_update_strategy
                );
                defaults.config_update_strategy
            }
        };
        let log_format = match lookup("LOG_FORMAT").map(|v| v.to_lowercase()).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                warn!("Unrecognised LOG_FORMAT '{}', using {:?}", other, defaults.log_format);
                defaults.log_format
            }
        };

        Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            gitlab_api_url: lookup("GITLAB_API_URL").unwrap_or(defaults.gitlab_api_url),
            gitlab_token: lookup("GITLAB_TOKEN").filter(|t| !t.is_empty()),
            gitlab_ref: lookup("GITLAB_REF").unwrap_or(defaults.gitlab_ref),
            gitlab_project_prefix: lookup("GITLAB_PROJECT_PREFIX").unwrap_or(defaults.gitlab_project_prefix),
            config_update_strategy,
            log_format,
        }
    }
}
