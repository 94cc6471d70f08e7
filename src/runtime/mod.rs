//! Remote container runtime access.
//!
//! The provisioning pipeline talks to the remote host exclusively through the
//! [`RuntimeApi`] trait. [`LxdClient`] implements it over the LXD REST API;
//! tests substitute an in-memory implementation.
//!
//! ## Architecture
//!
//! - [`client`]: authenticated REST session and the [`RuntimeApi`] implementation
//! - [`operation`]: response envelopes and background operation handling

mod client;
mod operation;

pub use client::{ConnectSettings, LxdClient};
pub use operation::{OperationStatus, ResponseEnvelope};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::fmt;

/// Remote runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Endpoint unreachable or TLS handshake failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authenticated, but the remote did not grant trust
    #[error("Client certificate is not trusted by {endpoint}")]
    Untrusted { endpoint: String },

    /// Remote call answered with an error
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Background operation finished unsuccessfully
    #[error("Operation {operation} failed: {message}")]
    Operation { operation: String, message: String },

    /// Remote answered with something we cannot interpret
    #[error("Unexpected response: {0}")]
    Protocol(String),

    /// Named remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport error after the session was established
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Container status as reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Frozen,
    Other(String),
}

impl From<String> for ContainerStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "Running" => ContainerStatus::Running,
            "Stopped" => ContainerStatus::Stopped,
            "Frozen" => ContainerStatus::Frozen,
            _ => ContainerStatus::Other(status),
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "Running"),
            ContainerStatus::Stopped => write!(f, "Stopped"),
            ContainerStatus::Frozen => write!(f, "Frozen"),
            ContainerStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

/// A remote container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerHandle {
    pub name: String,
    pub status: ContainerStatus,
}

impl ContainerHandle {
    pub fn is_stopped(&self) -> bool {
        self.status == ContainerStatus::Stopped
    }
}

/// A remote image, identified by its content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageHandle {
    pub fingerprint: String,
    #[serde(default)]
    pub aliases: Vec<ImageAlias>,
}

impl ImageHandle {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            aliases: Vec::new(),
        }
    }

    /// Operators may configure a shortened fingerprint.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.fingerprint.starts_with(prefix)
    }

    pub fn matches_exact(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageAlias {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Result of a command run inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Exported image content, delivered in chunks.
pub type ImageExport = BoxStream<'static, Result<Bytes>>;

/// Operations the provisioning pipeline needs from a container runtime.
///
/// Every mutating call returns once the remote side reports completion.
#[async_trait]
pub trait RuntimeApi: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>>;

    async fn list_images(&self) -> Result<Vec<ImageHandle>>;

    /// Create a container named `name` from the image with `fingerprint`.
    async fn create_container(&self, name: &str, fingerprint: &str) -> Result<ContainerHandle>;

    async fn start_container(&self, container: &ContainerHandle) -> Result<()>;

    async fn stop_container(&self, container: &ContainerHandle) -> Result<()>;

    async fn delete_container(&self, container: &ContainerHandle) -> Result<()>;

    /// Write `contents` to `path` inside the container.
    async fn put_file(&self, container: &ContainerHandle, path: &str, contents: Bytes)
    -> Result<()>;

    /// Run `command` and wait for it to exit.
    async fn exec(&self, container: &ContainerHandle, command: &[String]) -> Result<ExecResult>;

    /// Publish a stopped container as a new image.
    async fn publish(&self, container: &ContainerHandle) -> Result<ImageHandle>;

    async fn add_alias(&self, image: &ImageHandle, name: &str, description: &str) -> Result<()>;

    async fn export_image(&self, image: &ImageHandle) -> Result<ImageExport>;

    async fn delete_image(&self, image: &ImageHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_status_parsing() {
        let container: ContainerHandle =
            serde_json::from_str(r#"{"name": "builder", "status": "Stopped", "extra": 1}"#)
                .unwrap();
        assert!(container.is_stopped());

        let container: ContainerHandle =
            serde_json::from_str(r#"{"name": "builder", "status": "Starting"}"#).unwrap();
        assert_eq!(
            container.status,
            ContainerStatus::Other("Starting".to_string())
        );
        assert_eq!(container.status.to_string(), "Starting");
    }

    #[test]
    fn test_fingerprint_matching() {
        let image = ImageHandle::new("abc123def456");

        assert!(image.matches_prefix("abc123"));
        assert!(image.matches_prefix(""));
        assert!(!image.matches_prefix("def"));

        assert!(image.matches_exact("abc123def456"));
        assert!(!image.matches_exact("abc123"));
    }

    #[test]
    fn test_exec_result() {
        assert!(ExecResult { exit_code: 0 }.success());
        assert!(!ExecResult { exit_code: 127 }.success());
    }
}
