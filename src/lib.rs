//! # Image Generator
//!
//! Builds a container image on a remote LXD host from a declarative YAML
//! recipe: a fresh container is created from a base image, a tarball of
//! files is injected and a provisioning script run inside it, and the
//! result is published, aliased and exported as a local `.tar.gz`.
//!
//! ## Modules
//!
//! - **[`recipe`]**: recipe parsing and the action/field allow-list
//! - **[`identity`]**: the client certificate used to authenticate
//! - **[`runtime`]**: the remote runtime API and its LXD REST client
//! - **[`pipeline`]**: the ordered provisioning stages
//! - **[`cli`]**: argument parsing and process glue
//! - **[`env`]**: paths, names and timing constants

pub mod cli;
pub mod env;
pub mod identity;
pub mod pipeline;
pub mod recipe;
pub mod runtime;

pub use identity::{IdentityConfig, IdentityPaths, ensure_identity};
pub use pipeline::{
    PipelineContext, PipelineError, PipelineReport, PipelineTimings, ProvisioningPipeline, Stage,
};
pub use recipe::{Recipe, RecipeError, load_recipe, parse_recipe};
pub use runtime::{LxdClient, RuntimeApi, RuntimeError};
