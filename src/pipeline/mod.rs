//! The provisioning pipeline.
//!
//! A run walks through a fixed sequence of stages against the remote runtime:
//!
//! 1. **Connect**: authenticate with the client identity
//! 2. **RecreateContainer**: remove containers left over under the same name
//! 3. **LocateBaseImage**: resolve the configured fingerprint prefix
//! 4. **CreateAndStartContainer**: create, start and wait until running
//! 5. **InjectAndRun**: upload the tarball and run the provisioning script
//! 6. **StopAndPublish**: stop, publish and alias the new image
//! 7. **ExportAndClean**: download the image and apply the cleanup switches
//!
//! Stages never run concurrently and never go back. Any failure ends the
//! run; resources created so far are left in place for inspection.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use image_generator::identity::{IdentityConfig, ensure_identity};
//! use image_generator::pipeline::{PipelineContext, ProvisioningPipeline};
//! use image_generator::recipe::load_recipe;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let recipe = load_recipe(Path::new("recipe.yaml"))?;
//!     let ctx = PipelineContext::from_recipe(&recipe, false)?;
//!     let identity = ensure_identity(&IdentityConfig::default())?;
//!
//!     let mut pipeline = ProvisioningPipeline::connect(ctx, &identity).await?;
//!     let report = pipeline.run().await?;
//!     println!("{:?}", report.produced_fingerprint);
//!     Ok(())
//! }
//! ```

mod context;
pub mod script;
pub mod wait;

pub use context::{PipelineContext, PipelineTimings};
pub use wait::{WaitError, settle, wait_until};

use crate::env;
use crate::identity::{IdentityError, IdentityPaths};
use crate::recipe::RecipeError;
use crate::runtime::{
    ContainerHandle, ContainerStatus, ImageExport, ImageHandle, LxdClient, RuntimeApi,
    RuntimeError,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Connect,
    RecreateContainer,
    LocateBaseImage,
    CreateAndStartContainer,
    InjectAndRun,
    StopAndPublish,
    ExportAndClean,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::RecreateContainer => "recreate-container",
            Stage::LocateBaseImage => "locate-base-image",
            Stage::CreateAndStartContainer => "create-and-start-container",
            Stage::InjectAndRun => "inject-and-run",
            Stage::StopAndPublish => "stop-and-publish",
            Stage::ExportAndClean => "export-and-clean",
        };
        write!(f, "{}", name)
    }
}

/// Pipeline errors.
///
/// Every variant maps to a process exit code through [`PipelineError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Recipe unreadable, invalid or incomplete
    #[error("Configuration error: {0}")]
    Config(#[from] RecipeError),

    /// Client identity could not be prepared
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Remote endpoint unreachable
    #[error("Connection failed: {0}")]
    Connection(RuntimeError),

    /// Remote refused to trust the client
    #[error("Not trusted by {endpoint}")]
    Untrusted { endpoint: String },

    /// Base or produced image absent
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Local tarball does not exist
    #[error("Did not find file-tarball: {}", .0.display())]
    MissingTarball(PathBuf),

    /// Local filesystem failure
    #[error("I/O error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote call failed during a stage
    #[error("Stage {stage} failed: {source}")]
    RemoteOperation {
        stage: Stage,
        #[source]
        source: RuntimeError,
    },

    /// Command inside the container exited non-zero
    #[error("Stage {stage}: command exited with status {exit_code}")]
    CommandFailed { stage: Stage, exit_code: i64 },

    /// Remote never reached the awaited state
    #[error("Stage {stage}: {what} not ready after {waited:?}")]
    Timeout {
        stage: Stage,
        what: &'static str,
        waited: Duration,
    },
}

impl PipelineError {
    /// Process exit code for this error.
    ///
    /// `1` local problems, `3` connection and missing remote resources,
    /// `4` failed remote operations.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_)
            | PipelineError::Identity(_)
            | PipelineError::MissingTarball(_)
            | PipelineError::LocalIo { .. } => 1,
            PipelineError::Connection(_)
            | PipelineError::Untrusted { .. }
            | PipelineError::ResourceNotFound(_) => 3,
            PipelineError::RemoteOperation { .. }
            | PipelineError::CommandFailed { .. }
            | PipelineError::Timeout { .. } => 4,
        }
    }

    fn from_connect(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Untrusted { endpoint } => PipelineError::Untrusted { endpoint },
            other => PipelineError::Connection(other),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

fn remote(stage: Stage) -> impl FnOnce(RuntimeError) -> PipelineError {
    move |source| PipelineError::RemoteOperation { stage, source }
}

fn local_io(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::LocalIo {
        path: path.to_path_buf(),
        source,
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stages_completed: Vec<Stage>,
    /// Same-name containers removed before recreation
    pub stale_containers_removed: usize,
    /// Full fingerprint of the resolved base image
    pub base_fingerprint: Option<String>,
    pub produced_fingerprint: Option<String>,
    /// Export file left on disk; `None` after a dry run
    pub export_path: Option<PathBuf>,
    pub script_executed: bool,
    pub tmp_files_removed: bool,
    pub container_deleted: bool,
    pub image_deleted: bool,
}

/// Drives one provisioning run against a [`RuntimeApi`].
pub struct ProvisioningPipeline<R: RuntimeApi> {
    runtime: R,
    ctx: PipelineContext,
    report: PipelineReport,
}

impl ProvisioningPipeline<LxdClient> {
    /// Connect to the host named in the context.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connection`] or [`PipelineError::Untrusted`].
    pub async fn connect(ctx: PipelineContext, identity: &IdentityPaths) -> Result<Self> {
        info!("[{}] Authenticating against {}", Stage::Connect, ctx.connect.endpoint);
        let client = LxdClient::connect(&ctx.connect, identity)
            .await
            .map_err(PipelineError::from_connect)?;
        Ok(Self::with_runtime(ctx, client))
    }
}

impl<R: RuntimeApi> ProvisioningPipeline<R> {
    /// Build a pipeline on an already connected runtime.
    pub fn with_runtime(ctx: PipelineContext, runtime: R) -> Self {
        Self {
            runtime,
            ctx,
            report: PipelineReport {
                stages_completed: vec![Stage::Connect],
                ..Default::default()
            },
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run every stage after connect, in order.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing created so far is rolled back.
    pub async fn run(&mut self) -> Result<PipelineReport> {
        if self.ctx.dry_run {
            info!("Dry run: the script is skipped and the export file removed afterwards");
        }

        self.recreate_container().await?;
        self.complete(Stage::RecreateContainer);

        let base = self.locate_base_image().await?;
        self.complete(Stage::LocateBaseImage);

        let container = self.create_and_start_container(&base).await?;
        self.complete(Stage::CreateAndStartContainer);

        self.inject_and_run(&container).await?;
        self.complete(Stage::InjectAndRun);

        let produced = self.stop_and_publish(&container).await?;
        self.complete(Stage::StopAndPublish);

        self.export_and_clean(&produced).await?;
        self.complete(Stage::ExportAndClean);

        info!("Pipeline finished: {:?}", self.report);
        Ok(self.report.clone())
    }

    fn complete(&mut self, stage: Stage) {
        debug!("[{}] done", stage);
        self.report.stages_completed.push(stage);
    }

    async fn recreate_container(&mut self) -> Result<()> {
        let stage = Stage::RecreateContainer;
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(remote(stage))?;

        let name = self.ctx.container_name.clone();
        for container in containers.iter().filter(|c| c.name == name) {
            info!(
                "[{}] Found container {} ({}), deleting it before creating a new one",
                stage, container.name, container.status
            );
            if !container.is_stopped() {
                self.runtime
                    .stop_container(container)
                    .await
                    .map_err(remote(stage))?;
            }
            self.runtime
                .delete_container(container)
                .await
                .map_err(remote(stage))?;
            self.report.stale_containers_removed += 1;
        }

        Ok(())
    }

    async fn locate_base_image(&mut self) -> Result<ImageHandle> {
        let stage = Stage::LocateBaseImage;
        info!("[{}] Checking for images", stage);

        let prefix = &self.ctx.base_fingerprint;
        let image = self
            .runtime
            .list_images()
            .await
            .map_err(remote(stage))?
            .into_iter()
            .find(|image| image.matches_prefix(prefix))
            .ok_or_else(|| {
                PipelineError::ResourceNotFound(format!(
                    "base image with fingerprint prefix {}",
                    prefix
                ))
            })?;

        debug!("[{}] Using base image {}", stage, image.fingerprint);
        self.report.base_fingerprint = Some(image.fingerprint.clone());
        Ok(image)
    }

    async fn create_and_start_container(&mut self, base: &ImageHandle) -> Result<ContainerHandle> {
        let stage = Stage::CreateAndStartContainer;
        let name = self.ctx.container_name.as_str();

        info!("[{}] Creating container {}", stage, name);
        let container = self
            .runtime
            .create_container(name, &base.fingerprint)
            .await
            .map_err(remote(stage))?;

        self.runtime
            .start_container(&container)
            .await
            .map_err(remote(stage))?;
        let started = Instant::now();

        let runtime = &self.runtime;
        wait_until(
            || async move {
                let containers = runtime.list_containers().await?;
                Ok::<bool, RuntimeError>(
                    containers
                        .iter()
                        .any(|c| c.name == name && c.status == ContainerStatus::Running),
                )
            },
            self.ctx.timings.poll_interval,
            self.ctx.timings.readiness_timeout,
        )
        .await
        .map_err(|e| waited(stage, "container", e))?;

        // Give the network stack time to come up
        settle(started, self.ctx.timings.start_settle).await;

        Ok(ContainerHandle {
            status: ContainerStatus::Running,
            ..container
        })
    }

    async fn inject_and_run(&mut self, container: &ContainerHandle) -> Result<()> {
        let stage = Stage::InjectAndRun;
        let tarball = self.ctx.tarball.clone();

        if !tarball.exists() {
            error!("[{}] Did not find file-tarball: {}", stage, tarball.display());
            return Err(PipelineError::MissingTarball(tarball));
        }

        let raw = tokio::fs::read(&tarball).await.map_err(local_io(&tarball))?;
        let payload = BASE64.encode(&raw);
        debug!(
            "[{}] Uploading {} ({} bytes encoded)",
            stage,
            tarball.display(),
            payload.len()
        );

        self.runtime
            .put_file(container, env::remote::TMP_PAYLOAD_PATH, Bytes::from(payload))
            .await
            .map_err(remote(stage))?;

        if self.ctx.dry_run {
            info!("[{}] Dry run: not executing {}", stage, self.ctx.script);
        } else {
            info!("[{}] Executing {}", stage, self.ctx.script);
            let command = script::provision_command(
                env::remote::TMP_PAYLOAD_PATH,
                &self.ctx.file_dest,
                &self.ctx.script,
                self.ctx.timings.shell_poll,
                self.ctx.timings.shell_settle,
            );
            self.exec_checked(stage, container, &command).await?;
            self.report.script_executed = true;
        }

        if self.ctx.clean.tmp_files {
            info!("[{}] Deleting temporary files from the running container", stage);
            let command =
                script::cleanup_command(env::remote::TMP_PAYLOAD_PATH, &self.ctx.file_dest);
            self.exec_checked(stage, container, &command).await?;
            self.report.tmp_files_removed = true;
        }

        Ok(())
    }

    async fn exec_checked(
        &self,
        stage: Stage,
        container: &ContainerHandle,
        command: &[String],
    ) -> Result<()> {
        let result = self
            .runtime
            .exec(container, command)
            .await
            .map_err(remote(stage))?;

        if !result.success() {
            error!(
                "[{}] Command in {} exited with {}",
                stage, container.name, result.exit_code
            );
            return Err(PipelineError::CommandFailed {
                stage,
                exit_code: result.exit_code,
            });
        }
        Ok(())
    }

    async fn stop_and_publish(&mut self, container: &ContainerHandle) -> Result<ImageHandle> {
        let stage = Stage::StopAndPublish;

        info!("[{}] Stopping container in order to create the image", stage);
        self.runtime
            .stop_container(container)
            .await
            .map_err(remote(stage))?;

        info!("[{}] Starting to create the image, this can take a few minutes", stage);
        let image = self
            .runtime
            .publish(container)
            .await
            .map_err(remote(stage))?;
        let published = Instant::now();

        let runtime = &self.runtime;
        let fingerprint = image.fingerprint.as_str();
        wait_until(
            || async move {
                let images = runtime.list_images().await?;
                Ok::<bool, RuntimeError>(images.iter().any(|i| i.matches_exact(fingerprint)))
            },
            self.ctx.timings.poll_interval,
            self.ctx.timings.readiness_timeout,
        )
        .await
        .map_err(|e| waited(stage, "published image", e))?;
        settle(published, self.ctx.timings.publish_settle).await;

        self.runtime
            .add_alias(&image, &self.ctx.container_name, env::remote::ALIAS_DESCRIPTION)
            .await
            .map_err(remote(stage))?;

        info!(
            "[{}] Published the container as image with fingerprint {}",
            stage, image.fingerprint
        );
        self.report.produced_fingerprint = Some(image.fingerprint.clone());

        if self.ctx.clean.container {
            info!("[{}] Deleting container as it is not needed anymore", stage);
            self.runtime
                .delete_container(container)
                .await
                .map_err(remote(stage))?;
            self.report.container_deleted = true;
        }

        Ok(image)
    }

    async fn export_and_clean(&mut self, produced: &ImageHandle) -> Result<()> {
        let stage = Stage::ExportAndClean;

        let image = self
            .runtime
            .list_images()
            .await
            .map_err(remote(stage))?
            .into_iter()
            .find(|image| image.matches_exact(&produced.fingerprint))
            .ok_or_else(|| {
                PipelineError::ResourceNotFound(format!(
                    "published image {}",
                    produced.fingerprint
                ))
            })?;
        info!("[{}] Found the published image, exporting", stage);

        let path = self.ctx.export_path();
        if path.exists() {
            warn!("[{}] Replacing existing {}", stage, path.display());
        }

        let export = self
            .runtime
            .export_image(&image)
            .await
            .map_err(remote(stage))?;

        // Only a complete download ever appears under the final name
        let partial = partial_path(&path);
        let written = match download(stage, export, &partial).await {
            Ok(written) => written,
            Err(e) => {
                error!("[{}] Export failed, removing {}", stage, partial.display());
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!("[{}] Could not remove {}: {}", stage, partial.display(), cleanup);
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(local_io(&path))?;
        info!("[{}] Wrote {} bytes to {}", stage, written, path.display());

        if self.ctx.dry_run {
            info!("[{}] Dry run: removing {}", stage, path.display());
            tokio::fs::remove_file(&path).await.map_err(local_io(&path))?;
        } else {
            self.report.export_path = Some(path);
        }

        if self.ctx.clean.image_store {
            info!("[{}] Deleting image {} from the image store", stage, image.fingerprint);
            self.runtime
                .delete_image(&image)
                .await
                .map_err(remote(stage))?;
            self.report.image_deleted = true;
        }

        Ok(())
    }
}

/// `image.tar.gz` becomes `image.tar.gz.partial`.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Stream an export into `path`, returning the number of bytes written.
async fn download(stage: Stage, mut export: ImageExport, path: &Path) -> Result<usize> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(local_io(path))?;
    let mut written = 0usize;
    while let Some(chunk) = export.next().await {
        let chunk = chunk.map_err(remote(stage))?;
        file.write_all(&chunk).await.map_err(local_io(path))?;
        written += chunk.len();
    }
    file.flush().await.map_err(local_io(path))?;
    Ok(written)
}

fn waited(stage: Stage, what: &'static str, err: WaitError<RuntimeError>) -> PipelineError {
    match err {
        WaitError::Timeout(waited) => PipelineError::Timeout { stage, what, waited },
        WaitError::Check(source) => PipelineError::RemoteOperation { stage, source },
    }
}
