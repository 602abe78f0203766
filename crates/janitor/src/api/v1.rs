use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::errors::{Error, StdError};

/// API version implemented by this service
pub const API_VERSION: &str = "v1";

/// A tenant application deployment.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    /// Stable identifier, root of every derived object name
    pub uid: String,
    pub namespace: String,
    /// Grouping of the tenant in the source-control system
    #[serde(default)]
    pub domain: String,
}

impl Instance {
    pub fn new(uid: impl Into<String>, namespace: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            namespace: namespace.into(),
            domain: domain.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    #[serde(default)]
    pub containers: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    pub display_name: String,
    pub containers: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NamespaceAnnotation {
    pub key: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InstanceRequest {
    #[serde(default)]
    pub api: String,
    pub deployment: Instance,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InstanceCredentialsRequest {
    #[serde(default)]
    pub api: String,
    pub instance: Instance,
    pub credentials: Credentials,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PodRequest {
    #[serde(default)]
    pub api: String,
    pub deployment: Instance,
    pub pod: PodRef,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NamespaceRequest {
    #[serde(default)]
    pub api: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: Vec<NamespaceAnnotation>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Pending,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub api: String,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InfoServiceResponse {
    pub api: String,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub info: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PodListResponse {
    pub api: String,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub pods: Vec<PodInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PodLogsResponse {
    pub api: String,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub lines: Vec<String>,
}

impl ServiceResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message, None)
    }

    pub fn failed(message: impl Into<String>, error: &Error) -> Self {
        Self::new(Status::Failed, message, Some(error.to_string()))
    }

    pub fn new(status: Status, message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status,
            message: message.into(),
            error,
        }
    }
}

impl InfoServiceResponse {
    pub fn ok(info: impl Into<String>) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Ok,
            message: String::new(),
            error: None,
            info: info.into(),
        }
    }

    pub fn failed(message: impl Into<String>, error: &Error) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Failed,
            message: message.into(),
            error: Some(error.to_string()),
            info: String::new(),
        }
    }
}

impl PodListResponse {
    pub fn ok(pods: Vec<PodInfo>) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Ok,
            message: String::new(),
            error: None,
            pods,
        }
    }

    pub fn failed(message: impl Into<String>, error: &Error) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Failed,
            message: message.into(),
            error: Some(error.to_string()),
            pods: Vec::new(),
        }
    }
}

impl PodLogsResponse {
    pub fn ok(lines: Vec<String>) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Ok,
            message: String::new(),
            error: None,
            lines,
        }
    }

    pub fn failed(message: impl Into<String>, error: &Error) -> Self {
        Self {
            api: API_VERSION.to_string(),
            status: Status::Failed,
            message: message.into(),
            error: Some(error.to_string()),
            lines: Vec::new(),
        }
    }
}

/// Rejects a request whose non-empty API tag differs from [`API_VERSION`].
pub fn check_api(requested: &str) -> Result<(), Error> {
    if !requested.is_empty() && requested != API_VERSION {
        return Err(Error::StdError(StdError::UnsupportedVersion {
            supported: API_VERSION.to_string(),
            requested: requested.to_string(),
        }));
    }
    Ok(())
}
