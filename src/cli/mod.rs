//! CLI-specific functionality for the image generator
//!
//! This module contains argument parsing, logging setup and the glue that
//! turns a recipe file into a pipeline run.

pub mod args;
pub mod run;

pub use args::{Args, ExecutionMode, RunConfig, normalize_legacy_flags};
pub use run::{EXIT_NO_INPUT, exit_code_for, init_logging, log_filter, run_recipe};
