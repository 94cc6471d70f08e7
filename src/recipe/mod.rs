//! Recipe loading and validation.
//!
//! A recipe is a YAML mapping of action names to their fields. Loading runs
//! in two passes: the raw mapping is first checked against the allow-list in
//! [`schema`], then deserialized into the typed [`Recipe`].
//!
//! ```yaml
//! connect:
//!   url: https://10.0.0.2:8443
//!   trust-password: secret
//! create-container:
//!   container-name: builder
//!   container-image-fingerprint: abc123
//! copy-files:
//!   file-tarball: files.tar
//!   file-dest: /root/files.tar
//! execute-script:
//!   script: install.sh
//! create-image:
//!   destination: image
//! clean:
//!   tmp-files: true
//! ```

pub mod schema;
mod types;

pub use schema::{ALLOWED_ACTIONS, SchemaError, validate_actions};
pub use types::{
    CleanAction, ConnectAction, CopyFilesAction, CreateContainerAction, CreateImageAction,
    ExecuteScriptAction, Recipe,
};

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Recipe loading errors.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    /// Recipe file could not be read
    #[error("Failed to read recipe {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recipe is not valid YAML or has the wrong shape
    #[error("Failed to parse recipe: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Recipe document is not a mapping of actions
    #[error("Recipe must be a mapping of actions")]
    NotAMapping,

    /// Allow-list violation
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A field the pipeline needs is absent
    #[error("Missing required field {field} in action {action}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

/// Result type for recipe operations.
pub type Result<T> = std::result::Result<T, RecipeError>;

/// Read, validate and type a recipe file.
///
/// # Errors
///
/// Returns error if the file is unreadable, not YAML, or violates the schema.
pub fn load_recipe(path: &Path) -> Result<Recipe> {
    debug!("Loading recipe from {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|source| RecipeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_recipe(&content)
}

/// Validate and type recipe text.
///
/// # Errors
///
/// Returns error if the text is not YAML or violates the schema.
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    let raw: Value = serde_yaml::from_str(content)?;
    let actions = match raw {
        Value::Mapping(actions) => actions,
        // An empty document carries no actions
        Value::Null => Mapping::new(),
        _ => return Err(RecipeError::NotAMapping),
    };

    validate_actions(&actions)?;

    let names: Vec<&str> = actions.keys().filter_map(Value::as_str).collect();
    info!("Actions are {:?}", names);

    Ok(serde_yaml::from_value(Value::Mapping(actions))?)
}

/// Unwrap a required recipe value or report which one is missing.
pub(crate) fn require<T: Clone>(
    value: Option<&T>,
    action: &'static str,
    field: &'static str,
) -> Result<T> {
    value
        .cloned()
        .ok_or(RecipeError::MissingField { action, field })
}
