//! In-memory runtime and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::stream;
use image_generator::pipeline::{PipelineContext, PipelineTimings};
use image_generator::recipe::parse_recipe;
use image_generator::runtime::{
    ContainerHandle, ContainerStatus, ExecResult, ImageExport, ImageHandle, Result, RuntimeApi,
    RuntimeError,
};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const BASE_FINGERPRINT: &str = "abc123def4567890";
pub const PRODUCED_FINGERPRINT: &str = "fedcba9876543210";

#[derive(Debug, Default)]
pub struct FakeState {
    pub containers: Vec<ContainerHandle>,
    pub images: Vec<ImageHandle>,
    /// (container, path, contents)
    pub files: Vec<(String, String, Bytes)>,
    pub execs: Vec<Vec<String>>,
    /// Every mutating call, in order
    pub events: Vec<String>,
    /// Exit codes handed out by `exec`, `0` once exhausted
    pub exit_codes: VecDeque<i64>,
    /// Image listings that still hide a freshly published image
    pub publish_lag: usize,
    /// Containers listed as `Starting` for this many listings after start
    pub start_lag: usize,
    pub export_chunks: Vec<Bytes>,
    /// Break the export stream after the first chunk
    pub export_breaks: bool,
}

/// A [`RuntimeApi`] keeping everything in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.with_state(|s| {
            s.images.push(ImageHandle::new(BASE_FINGERPRINT));
            s.export_chunks = gzip_chunks(b"rootfs contents");
        });
        runtime
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn events(&self) -> Vec<String> {
        self.with_state(|s| s.events.clone())
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.with_state(|s| s.execs.clone())
    }

    pub fn container(&self, name: &str) -> Option<ContainerHandle> {
        self.with_state(|s| s.containers.iter().find(|c| c.name == name).cloned())
    }

    pub fn has_image(&self, fingerprint: &str) -> bool {
        self.with_state(|s| s.images.iter().any(|i| i.fingerprint == fingerprint))
    }

    fn record(&self, event: String) {
        self.with_state(|s| s.events.push(event));
    }

    fn set_status(&self, name: &str, status: ContainerStatus) -> Result<()> {
        self.with_state(|s| {
            let container = s
                .containers
                .iter_mut()
                .find(|c| c.name == name)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {}", name)))?;
            container.status = status;
            Ok(())
        })
    }
}

#[async_trait]
impl RuntimeApi for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        Ok(self.with_state(|s| {
            if s.start_lag == 0 {
                return s.containers.clone();
            }
            s.start_lag -= 1;
            s.containers
                .iter()
                .cloned()
                .map(|mut c| {
                    if c.status == ContainerStatus::Running {
                        c.status = ContainerStatus::Other("Starting".to_string());
                    }
                    c
                })
                .collect()
        }))
    }

    async fn list_images(&self) -> Result<Vec<ImageHandle>> {
        Ok(self.with_state(|s| {
            if s.publish_lag == 0 {
                return s.images.clone();
            }
            s.publish_lag -= 1;
            s.images
                .iter()
                .filter(|i| i.fingerprint != PRODUCED_FINGERPRINT)
                .cloned()
                .collect()
        }))
    }

    async fn create_container(&self, name: &str, fingerprint: &str) -> Result<ContainerHandle> {
        self.record(format!("create {} from {}", name, fingerprint));
        let container = ContainerHandle {
            name: name.to_string(),
            status: ContainerStatus::Stopped,
        };
        self.with_state(|s| s.containers.push(container.clone()));
        Ok(container)
    }

    async fn start_container(&self, container: &ContainerHandle) -> Result<()> {
        self.record(format!("start {}", container.name));
        self.set_status(&container.name, ContainerStatus::Running)
    }

    async fn stop_container(&self, container: &ContainerHandle) -> Result<()> {
        self.record(format!("stop {}", container.name));
        self.set_status(&container.name, ContainerStatus::Stopped)
    }

    async fn delete_container(&self, container: &ContainerHandle) -> Result<()> {
        self.record(format!("delete {}", container.name));
        self.with_state(|s| {
            let position = s
                .containers
                .iter()
                .position(|c| c.name == container.name)
                .ok_or_else(|| RuntimeError::NotFound(format!("container {}", container.name)))?;
            s.containers.remove(position);
            Ok(())
        })
    }

    async fn put_file(
        &self,
        container: &ContainerHandle,
        path: &str,
        contents: Bytes,
    ) -> Result<()> {
        self.record(format!("put {} {}", container.name, path));
        self.with_state(|s| {
            s.files
                .push((container.name.clone(), path.to_string(), contents))
        });
        Ok(())
    }

    async fn exec(&self, container: &ContainerHandle, command: &[String]) -> Result<ExecResult> {
        self.record(format!("exec {}", container.name));
        let exit_code = self.with_state(|s| {
            s.execs.push(command.to_vec());
            s.exit_codes.pop_front().unwrap_or(0)
        });
        Ok(ExecResult { exit_code })
    }

    async fn publish(&self, container: &ContainerHandle) -> Result<ImageHandle> {
        self.record(format!("publish {}", container.name));
        let image = ImageHandle::new(PRODUCED_FINGERPRINT);
        self.with_state(|s| s.images.push(image.clone()));
        Ok(image)
    }

    async fn add_alias(&self, image: &ImageHandle, name: &str, _description: &str) -> Result<()> {
        self.record(format!("alias {} {}", image.fingerprint, name));
        Ok(())
    }

    async fn export_image(&self, image: &ImageHandle) -> Result<ImageExport> {
        self.record(format!("export {}", image.fingerprint));
        let (chunks, breaks) = self.with_state(|s| (s.export_chunks.clone(), s.export_breaks));
        let mut items: Vec<Result<Bytes>> = chunks.into_iter().map(Ok).collect();
        if breaks {
            items.truncate(1);
            items.push(Err(RuntimeError::Protocol("connection reset".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn delete_image(&self, image: &ImageHandle) -> Result<()> {
        self.record(format!("delete-image {}", image.fingerprint));
        self.with_state(|s| s.images.retain(|i| i.fingerprint != image.fingerprint));
        Ok(())
    }
}

/// Gzip `content` and split it into a few chunks.
pub fn gzip_chunks(content: &[u8]) -> Vec<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    let gz = encoder.finish().unwrap();
    gz.chunks(8).map(Bytes::copy_from_slice).collect()
}

/// Write a tarball holding an `install.sh` into `dir`.
pub fn write_tarball(dir: &Path) -> PathBuf {
    let path = dir.join("files.tar");
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(file);

    let script = b"#!/bin/sh\necho provisioned\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "install.sh", &script[..])
        .unwrap();
    builder.finish().unwrap();
    path
}

/// A complete recipe using `tarball` and exporting to `destination`.
pub fn recipe_yaml(tarball: &Path, destination: &Path, clean: &str) -> String {
    format!(
        r#"
connect:
  url: https://127.0.0.1:8443
  trust-password: secret
create-container:
  container-name: builder
  container-image-fingerprint: abc123
copy-files:
  file-tarball: {}
  file-dest: /root/files.tar
execute-script:
  script: install.sh
create-image:
  destination: {}
{}
"#,
        tarball.display(),
        destination.display(),
        clean
    )
}

pub fn context(yaml: &str, dry_run: bool) -> PipelineContext {
    let recipe = parse_recipe(yaml).unwrap();
    PipelineContext::from_recipe(&recipe, dry_run)
        .unwrap()
        .with_timings(PipelineTimings::immediate())
}
