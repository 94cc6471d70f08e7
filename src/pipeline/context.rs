//! Run-wide settings resolved before the first remote call.

use crate::env;
use crate::recipe::{self, CleanAction, Recipe, require, schema};
use crate::runtime::ConnectSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Settle times and readiness bounds of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimings {
    /// Minimum wait after the container started
    pub start_settle: Duration,
    /// Minimum wait between publish and alias
    pub publish_settle: Duration,
    /// Sleep inside the injected command before decoding
    pub shell_settle: Duration,
    /// Poll interval of the injected command's wait loop
    pub shell_poll: Duration,
    /// Interval between readiness checks
    pub poll_interval: Duration,
    /// Give up waiting for readiness after this long
    pub readiness_timeout: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            start_settle: env::timing::START_SETTLE,
            publish_settle: env::timing::PUBLISH_SETTLE,
            shell_settle: env::timing::SHELL_SETTLE,
            shell_poll: env::timing::SHELL_POLL,
            poll_interval: env::timing::POLL_INTERVAL,
            readiness_timeout: env::timing::READINESS_TIMEOUT,
        }
    }
}

impl PipelineTimings {
    /// No settle time at all; readiness checks still apply.
    pub fn immediate() -> Self {
        Self {
            start_settle: Duration::ZERO,
            publish_settle: Duration::ZERO,
            shell_settle: Duration::ZERO,
            shell_poll: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            readiness_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a pipeline run needs, resolved once from the recipe and the
/// command line.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub connect: ConnectSettings,
    pub container_name: String,
    /// Possibly shortened fingerprint of the base image
    pub base_fingerprint: String,
    pub tarball: PathBuf,
    /// Where the tarball is decoded inside the container
    pub file_dest: String,
    /// Script path relative to the unpack directory
    pub script: String,
    pub destination: String,
    pub clean: CleanAction,
    pub dry_run: bool,
    pub timings: PipelineTimings,
}

impl PipelineContext {
    /// Resolve the values of a validated recipe.
    ///
    /// # Errors
    ///
    /// Returns [`recipe::RecipeError::MissingField`] naming the first absent
    /// value; only `clean` may be left out entirely.
    pub fn from_recipe(recipe: &Recipe, dry_run: bool) -> recipe::Result<Self> {
        let connect = recipe.connect.clone().unwrap_or_default();
        let container = recipe.create_container.clone().unwrap_or_default();
        let copy = recipe.copy_files.clone().unwrap_or_default();
        let execute = recipe.execute_script.clone().unwrap_or_default();
        let image = recipe.create_image.clone().unwrap_or_default();

        let url = require(connect.url.as_ref(), schema::CONNECT, "url")?;
        let trust_password = require(
            connect.trust_password.as_ref(),
            schema::CONNECT,
            "trust-password",
        )?;

        Ok(Self {
            connect: ConnectSettings::new(url, trust_password),
            container_name: require(
                container.container_name.as_ref(),
                schema::CREATE_CONTAINER,
                "container-name",
            )?,
            base_fingerprint: require(
                container.container_image_fingerprint.as_ref(),
                schema::CREATE_CONTAINER,
                "container-image-fingerprint",
            )?,
            tarball: PathBuf::from(require(
                copy.file_tarball.as_ref(),
                schema::COPY_FILES,
                "file-tarball",
            )?),
            file_dest: require(copy.file_dest.as_ref(), schema::COPY_FILES, "file-dest")?,
            script: require(execute.script.as_ref(), schema::EXECUTE_SCRIPT, "script")?,
            destination: require(
                image.destination.as_ref(),
                schema::CREATE_IMAGE,
                "destination",
            )?,
            clean: recipe.clean.unwrap_or_default(),
            dry_run,
            timings: PipelineTimings::default(),
        })
    }

    pub fn with_timings(mut self, timings: PipelineTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Export file name with the `.tar.gz` suffix enforced.
    pub fn export_path(&self) -> PathBuf {
        env::export_file_path(&self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{RecipeError, parse_recipe};

    const RECIPE: &str = r#"
connect:
  url: https://10.0.0.2:8443
  trust-password: secret
create-container:
  container-name: builder
  container-image-fingerprint: abc123
copy-files:
  file-tarball: files.tar
  file-dest: /root/files.tar
execute-script:
  script: install.sh
create-image:
  destination: out
"#;

    #[test]
    fn test_context_from_recipe() {
        let recipe = parse_recipe(RECIPE).unwrap();
        let ctx = PipelineContext::from_recipe(&recipe, true).unwrap();

        assert_eq!(ctx.connect.endpoint, "https://10.0.0.2:8443");
        assert_eq!(ctx.connect.trust_password, "secret");
        assert_eq!(ctx.container_name, "builder");
        assert_eq!(ctx.base_fingerprint, "abc123");
        assert_eq!(ctx.tarball, PathBuf::from("files.tar"));
        assert_eq!(ctx.file_dest, "/root/files.tar");
        assert_eq!(ctx.script, "install.sh");
        assert_eq!(ctx.export_path(), PathBuf::from("out.tar.gz"));
        assert_eq!(ctx.clean, CleanAction::default());
        assert!(ctx.dry_run);
        assert_eq!(ctx.timings, PipelineTimings::default());
    }

    #[test]
    fn test_missing_field_is_named() {
        let recipe = parse_recipe(&RECIPE.replace("  script: install.sh\n", "")).unwrap();

        match PipelineContext::from_recipe(&recipe, false) {
            Err(RecipeError::MissingField { action, field }) => {
                assert_eq!(action, "execute-script");
                assert_eq!(field, "script");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_action_is_named() {
        let recipe = parse_recipe("clean:\n  container: true\n").unwrap();

        match PipelineContext::from_recipe(&recipe, false) {
            Err(RecipeError::MissingField { action, field }) => {
                assert_eq!(action, "connect");
                assert_eq!(field, "url");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_timings() {
        let timings = PipelineTimings::default();
        assert_eq!(timings.start_settle, Duration::from_secs(4));
        assert_eq!(timings.publish_settle, Duration::from_secs(2));
        assert_eq!(timings.shell_settle, Duration::from_secs(4));
    }
}
