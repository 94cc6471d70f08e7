//! Response envelopes of the management API.
//!
//! Every answer is wrapped in an envelope whose `type` is `sync`, `async` or
//! `error`. Asynchronous answers reference a background operation that has
//! to be waited on before its result is known.

use super::{Result, RuntimeError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outer envelope of every response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub metadata: Value,
}

impl ResponseEnvelope {
    /// Turn an `error` envelope into an error, pass anything else through.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Api`] for error envelopes.
    pub fn into_result(self) -> Result<Self> {
        if self.kind == "error" {
            return Err(RuntimeError::Api {
                status: self.error_code,
                message: self.error,
            });
        }
        Ok(self)
    }

    /// Deserialize the metadata of a `sync` answer.
    ///
    /// # Errors
    ///
    /// Returns error if the envelope is not `sync` or the metadata has the
    /// wrong shape.
    pub fn sync_metadata<T: DeserializeOwned>(self) -> Result<T> {
        let envelope = self.into_result()?;
        if envelope.kind != "sync" {
            return Err(RuntimeError::Protocol(format!(
                "expected a sync response, got {}",
                envelope.kind
            )));
        }
        serde_json::from_value(envelope.metadata)
            .map_err(|e| RuntimeError::Protocol(format!("malformed metadata: {}", e)))
    }

    /// Operation URL of an `async` answer.
    ///
    /// # Errors
    ///
    /// Returns error if the envelope does not reference an operation.
    pub fn operation_url(self) -> Result<String> {
        let envelope = self.into_result()?;
        if envelope.kind != "async" || envelope.operation.is_empty() {
            return Err(RuntimeError::Protocol(format!(
                "expected an async response, got {}",
                envelope.kind
            )));
        }
        Ok(envelope.operation)
    }
}

/// State of a background operation once it has been waited on.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub id: String,
    pub status: String,
    pub status_code: u16,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub metadata: Value,
}

impl OperationStatus {
    /// 200 is success; 4xx covers failure and cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Operation`] unless the operation succeeded.
    pub fn into_success(self) -> Result<Self> {
        if self.status_code == 200 {
            return Ok(self);
        }
        let message = if self.err.is_empty() {
            self.status.clone()
        } else {
            self.err.clone()
        };
        Err(RuntimeError::Operation {
            operation: self.id,
            message,
        })
    }

    /// Exit status recorded by an exec operation.
    pub fn exit_code(&self) -> Option<i64> {
        self.metadata.get("return").and_then(Value::as_i64)
    }

    /// Fingerprint recorded by a publish operation.
    pub fn fingerprint(&self) -> Option<&str> {
        self.metadata.get("fingerprint").and_then(Value::as_str)
    }

    /// Log paths of a recorded exec, ordered by file descriptor.
    pub fn output_logs(&self) -> Vec<String> {
        let Some(output) = self.metadata.get("output").and_then(Value::as_object) else {
            return Vec::new();
        };
        let mut logs: Vec<(&String, &str)> = output
            .iter()
            .filter_map(|(fd, path)| path.as_str().map(|path| (fd, path)))
            .collect();
        logs.sort();
        logs.into_iter().map(|(_, path)| path.to_string()).collect()
    }
}
