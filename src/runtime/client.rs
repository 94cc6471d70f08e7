//! LXD REST client.
//!
//! Wraps a reqwest client configured with the local TLS identity and exposes
//! the container and image calls the pipeline needs. Background operations
//! are always waited on before a call returns.

use super::operation::{OperationStatus, ResponseEnvelope};
use super::{
    ContainerHandle, ExecResult, ImageExport, ImageHandle, Result, RuntimeApi, RuntimeError,
};
use crate::env;
use crate::identity::IdentityPaths;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectSettings {
    /// Management endpoint, e.g. `https://10.0.0.2:8443`
    pub endpoint: String,
    /// Shared secret used to get the client certificate trusted
    pub trust_password: String,
    /// Connection timeout
    pub timeout: Duration,
}

impl ConnectSettings {
    pub fn new(endpoint: impl Into<String>, trust_password: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            trust_password: trust_password.into(),
            timeout: Duration::from_secs(env::remote::CONNECT_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for ConnectSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectSettings")
            .field("endpoint", &self.endpoint)
            .field("trust_password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    auth: String,
}

/// Authenticated session against an LXD host.
#[derive(Clone)]
pub struct LxdClient {
    http: reqwest::Client,
    base: Url,
    trusted: bool,
}

impl LxdClient {
    /// Connect and make sure the client certificate is trusted.
    ///
    /// If the server does not know the certificate yet, it is registered with
    /// the trust password.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Connection`] if the endpoint is unreachable or
    /// the identity unusable, and [`RuntimeError::Untrusted`] if the server
    /// still refuses trust after authentication.
    pub async fn connect(settings: &ConnectSettings, identity: &IdentityPaths) -> Result<Self> {
        let base = Url::parse(&settings.endpoint).map_err(|e| {
            RuntimeError::Connection(format!("Invalid endpoint {}: {}", settings.endpoint, e))
        })?;

        let pem = identity
            .read_pem_bundle()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        let tls_identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| RuntimeError::Connection(format!("Unusable client identity: {}", e)))?;

        // The remote serves a self-signed certificate
        let http = reqwest::Client::builder()
            .identity(tls_identity)
            .danger_accept_invalid_certs(true)
            .connect_timeout(settings.timeout)
            .build()
            .map_err(|e| RuntimeError::Connection(format!("Failed to build client: {}", e)))?;

        let mut client = Self {
            http,
            base,
            trusted: false,
        };

        debug!("Connecting to {}", settings.endpoint);
        client.trusted = client.server_trusted().await?;

        if !client.trusted {
            info!("Client not trusted yet, authenticating with trust password");
            client.authenticate(&settings.trust_password).await?;
            client.trusted = client.server_trusted().await?;
        }

        if !client.trusted {
            error!("Problem connecting: {} did not trust this client", settings.endpoint);
            return Err(RuntimeError::Untrusted {
                endpoint: settings.endpoint.clone(),
            });
        }

        info!("Connected to {}", settings.endpoint);
        Ok(client)
    }

    /// Whether the server reported this client as trusted.
    pub fn trusted(&self) -> bool {
        self.trusted
    }

    async fn server_trusted(&self) -> Result<bool> {
        let response = self
            .http
            .get(self.url("/1.0")?)
            .send()
            .await
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        let envelope: ResponseEnvelope = response
            .json()
            .await
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        let info: ServerInfo = envelope.sync_metadata()?;
        Ok(info.auth == "trusted")
    }

    async fn authenticate(&self, password: &str) -> Result<()> {
        let request = self.http.post(self.url("/1.0/certificates")?).json(&json!({
            "type": "client",
            "password": password,
        }));

        // A wrong password surfaces as an error envelope; that is still a
        // trust problem, not a transport one
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::Api { status, message }) => {
                debug!("Certificate registration refused ({}): {}", status, message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| RuntimeError::Protocol(format!("Invalid path {}: {}", path, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ResponseEnvelope> {
        let response = request.send().await?;
        let envelope: ResponseEnvelope = response.json().await?;
        envelope.into_result()
    }

    /// Send a request answered by a background operation and wait for it.
    async fn run_operation(&self, request: reqwest::RequestBuilder) -> Result<OperationStatus> {
        let operation = self.send(request).await?.operation_url()?;
        debug!("Waiting for operation {}", operation);

        let wait_url = self.url(&format!("{}/wait", operation))?;
        let status: OperationStatus = self.send(self.http.get(wait_url)).await?.sync_metadata()?;
        status.into_success()
    }

    /// Raw content of a log file recorded by the server.
    async fn fetch_log(&self, path: &str) -> Result<String> {
        let response = self.http.get(self.url(path)?).send().await?;
        Ok(response.error_for_status()?.text().await?)
    }

    async fn get_container(&self, name: &str) -> Result<ContainerHandle> {
        let url = self.url(&format!("/1.0/containers/{}", name))?;
        match self.send(self.http.get(url)).await {
            Ok(envelope) => envelope.sync_metadata(),
            Err(RuntimeError::Api { status: 404, .. }) => {
                Err(RuntimeError::NotFound(format!("container {}", name)))
            }
            Err(e) => Err(e),
        }
    }

    async fn change_state(&self, container: &ContainerHandle, action: &str) -> Result<()> {
        let url = self.url(&format!("/1.0/containers/{}/state", container.name))?;
        self.run_operation(self.http.put(url).json(&json!({
            "action": action,
            "timeout": env::remote::STOP_TIMEOUT_SECS,
            "force": false,
        })))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RuntimeApi for LxdClient {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        let url = self.url("/1.0/containers?recursion=1")?;
        self.send(self.http.get(url)).await?.sync_metadata()
    }

    async fn list_images(&self) -> Result<Vec<ImageHandle>> {
        let url = self.url("/1.0/images?recursion=1")?;
        self.send(self.http.get(url)).await?.sync_metadata()
    }

    async fn create_container(&self, name: &str, fingerprint: &str) -> Result<ContainerHandle> {
        debug!("Creating container {} from image {}", name, fingerprint);
        let url = self.url("/1.0/containers")?;
        self.run_operation(self.http.post(url).json(&json!({
            "name": name,
            "source": {"type": "image", "fingerprint": fingerprint},
        })))
        .await?;

        self.get_container(name).await
    }

    async fn start_container(&self, container: &ContainerHandle) -> Result<()> {
        self.change_state(container, "start").await
    }

    async fn stop_container(&self, container: &ContainerHandle) -> Result<()> {
        self.change_state(container, "stop").await
    }

    async fn delete_container(&self, container: &ContainerHandle) -> Result<()> {
        let url = self.url(&format!("/1.0/containers/{}", container.name))?;
        self.run_operation(self.http.delete(url)).await?;
        Ok(())
    }

    async fn put_file(
        &self,
        container: &ContainerHandle,
        path: &str,
        contents: Bytes,
    ) -> Result<()> {
        debug!(
            "Uploading {} bytes to {}:{}",
            contents.len(),
            container.name,
            path
        );
        let url = self.url(&format!("/1.0/containers/{}/files", container.name))?;
        let request = self
            .http
            .post(url)
            .query(&[("path", path)])
            .header("X-LXD-type", "file")
            .header("X-LXD-write", "overwrite")
            .body(contents);
        self.send(request).await?;
        Ok(())
    }

    async fn exec(&self, container: &ContainerHandle, command: &[String]) -> Result<ExecResult> {
        debug!("Executing in {}: {:?}", container.name, command);
        let url = self.url(&format!("/1.0/containers/{}/exec", container.name))?;
        let status = self
            .run_operation(self.http.post(url).json(&json!({
                "command": command,
                "environment": {},
                "wait-for-websocket": false,
                "interactive": false,
                "record-output": true,
            })))
            .await?;

        let exit_code = status.exit_code().ok_or_else(|| {
            RuntimeError::Protocol("exec operation did not report an exit status".to_string())
        })?;

        let logs = status.output_logs();
        debug!("Output of {} recorded at {:?}", container.name, logs);
        if exit_code != 0 {
            for log in &logs {
                match self.fetch_log(log).await {
                    Ok(output) => warn!(
                        "{} exited with {}, {}:\n{}",
                        container.name, exit_code, log, output
                    ),
                    Err(e) => debug!("Could not fetch {}: {}", log, e),
                }
            }
        }

        Ok(ExecResult { exit_code })
    }

    async fn publish(&self, container: &ContainerHandle) -> Result<ImageHandle> {
        let url = self.url("/1.0/images")?;
        let status = self
            .run_operation(self.http.post(url).json(&json!({
                "source": {"type": "container", "name": container.name},
            })))
            .await?;

        let fingerprint = status.fingerprint().ok_or_else(|| {
            RuntimeError::Protocol("publish operation did not report a fingerprint".to_string())
        })?;
        Ok(ImageHandle::new(fingerprint))
    }

    async fn add_alias(&self, image: &ImageHandle, name: &str, description: &str) -> Result<()> {
        let url = self.url("/1.0/images/aliases")?;
        self.send(self.http.post(url).json(&json!({
            "name": name,
            "description": description,
            "target": image.fingerprint,
        })))
        .await?;
        Ok(())
    }

    async fn export_image(&self, image: &ImageHandle) -> Result<ImageExport> {
        let url = self.url(&format!("/1.0/images/{}/export", image.fingerprint))?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            let envelope: ResponseEnvelope = response.json().await?;
            envelope.into_result()?;
            return Err(RuntimeError::Protocol(
                "export answered with a non-error envelope and a failure status".to_string(),
            ));
        }

        Ok(response.bytes_stream().map_err(RuntimeError::from).boxed())
    }

    async fn delete_image(&self, image: &ImageHandle) -> Result<()> {
        let url = self.url(&format!("/1.0/images/{}", image.fingerprint))?;
        self.run_operation(self.http.delete(url)).await?;
        Ok(())
    }
}
