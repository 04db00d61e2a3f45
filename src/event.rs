// src/event.rs - Deploy event payload
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed deploy event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("deploy event field '{0}' is empty")]
    EmptyField(&'static str),
}

/// A published firmware build, identified by package and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployEvent {
    pub package_name: String,
    pub version_name: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

/// Wire shape: `{"package": {"name": ..}, "version": {"name": ..}, ...}`.
#[derive(Debug, Deserialize)]
struct RawDeployEvent {
    package: Named,
    version: Named,
}

impl DeployEvent {
    pub fn new(package_name: impl Into<String>, version_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            version_name: version_name.into(),
        }
    }

    /// Decode the payload string delivered by the notification transport.
    pub fn decode(payload: &str) -> Result<Self, EventError> {
        let raw: RawDeployEvent = serde_json::from_str(payload)?;
        if raw.package.name.is_empty() {
            return Err(EventError::EmptyField("package.name"));
        }
        if raw.version.name.is_empty() {
            return Err(EventError::EmptyField("version.name"));
        }
        Ok(Self {
            package_name: raw.package.name,
            version_name: raw.version.name,
        })
    }
}
