//! Allow-list validation of the raw action map.
//!
//! The recipe file is checked against a fixed schema before anything else
//! happens: every action must be known and every field under an action must
//! belong to it. Cross-field consistency is not checked here.

use serde_yaml::{Mapping, Value};

/// Connect to the remote management endpoint
pub const CONNECT: &str = "connect";
/// Recreate the build container
pub const CREATE_CONTAINER: &str = "create-container";
/// Inject the local tarball
pub const COPY_FILES: &str = "copy-files";
/// Run the provisioning script
pub const EXECUTE_SCRIPT: &str = "execute-script";
/// Publish and export the image
pub const CREATE_IMAGE: &str = "create-image";
/// Cleanup switches
pub const CLEAN: &str = "clean";

/// Action name to allowed field names, in the order they are documented.
pub const ALLOWED_ACTIONS: &[(&str, &[&str])] = &[
    (CONNECT, &["url", "trust-password"]),
    (
        CREATE_CONTAINER,
        &["container-name", "container-image-fingerprint"],
    ),
    (COPY_FILES, &["file-tarball", "file-dest"]),
    (EXECUTE_SCRIPT, &["script"]),
    (CREATE_IMAGE, &["destination"]),
    (CLEAN, &["tmp-files", "container", "image-store"]),
];

/// Schema violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Top-level key is not a known action
    #[error("action {action} is not in allowed actions, please choose between {allowed:?}")]
    UnknownAction {
        action: String,
        allowed: Vec<&'static str>,
    },

    /// Field is not allowed under its action
    #[error(
        "field {field} is not in allowed field of action {action}, please choose between {allowed:?}"
    )]
    UnknownField {
        action: String,
        field: String,
        allowed: Vec<&'static str>,
    },

    /// Action body is neither a mapping nor empty
    #[error("action {action} must be a mapping of fields, found {found}")]
    NotAMapping { action: String, found: &'static str },

    /// Key that is not a string
    #[error("keys must be strings, found {found}")]
    NonStringKey { found: &'static str },
}

/// Allowed fields of an action, `None` for unknown actions.
pub fn allowed_fields(action: &str) -> Option<&'static [&'static str]> {
    ALLOWED_ACTIONS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, fields)| *fields)
}

/// Names of all known actions.
pub fn action_names() -> Vec<&'static str> {
    ALLOWED_ACTIONS.iter().map(|(name, _)| *name).collect()
}

/// Validate a parsed action map against [`ALLOWED_ACTIONS`].
///
/// Keys are visited in document order and the first violation is returned.
/// A `null` action body is accepted as an empty set of fields.
///
/// # Errors
///
/// Returns the first [`SchemaError`] encountered.
pub fn validate_actions(actions: &Mapping) -> Result<(), SchemaError> {
    for (key, body) in actions {
        let action = key_str(key)?;
        let allowed = allowed_fields(action).ok_or_else(|| SchemaError::UnknownAction {
            action: action.to_string(),
            allowed: action_names(),
        })?;

        let fields = match body {
            Value::Mapping(fields) => fields,
            Value::Null => continue,
            other => {
                return Err(SchemaError::NotAMapping {
                    action: action.to_string(),
                    found: value_kind(other),
                });
            }
        };

        for field_key in fields.keys() {
            let field = key_str(field_key)?;
            if !allowed.contains(&field) {
                return Err(SchemaError::UnknownField {
                    action: action.to_string(),
                    field: field.to_string(),
                    allowed: allowed.to_vec(),
                });
            }
        }
    }

    Ok(())
}

fn key_str(key: &Value) -> Result<&str, SchemaError> {
    key.as_str().ok_or(SchemaError::NonStringKey {
        found: value_kind(key),
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_recipe() -> Mapping {
        serde_yaml::from_str(
            r#"
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
  destination: image
clean:
  tmp-files: true
  container: true
  image-store: false
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_full_recipe_is_accepted() {
        assert_eq!(validate_actions(&full_recipe()), Ok(()));
    }

    #[test]
    fn test_empty_recipe_is_accepted() {
        assert_eq!(validate_actions(&Mapping::new()), Ok(()));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let mut recipe = full_recipe();
        recipe.insert("reboot".into(), Value::Mapping(Mapping::new()));

        let err = validate_actions(&recipe).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownAction { ref action, .. } if action == "reboot"));
        assert!(err.to_string().contains("create-container"));
    }

    #[test]
    fn test_adding_any_unknown_key_flips_acceptance() {
        // One extra field under each known action
        for (action, _) in ALLOWED_ACTIONS {
            let mut recipe = full_recipe();
            let body = recipe
                .get_mut(*action)
                .and_then(Value::as_mapping_mut)
                .unwrap();
            body.insert("unexpected".into(), "x".into());

            match validate_actions(&recipe) {
                Err(SchemaError::UnknownField {
                    action: got, field, ..
                }) => {
                    assert_eq!(got, *action);
                    assert_eq!(field, "unexpected");
                }
                other => panic!("expected rejection for {}, got {:?}", action, other),
            }
        }
    }

    #[test]
    fn test_field_of_another_action_is_rejected() {
        let recipe: Mapping = serde_yaml::from_str("connect:\n  script: install.sh\n").unwrap();
        assert!(matches!(
            validate_actions(&recipe),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_first_violation_wins() {
        let recipe: Mapping =
            serde_yaml::from_str("first: {}\nconnect:\n  bogus: 1\n").unwrap();
        assert!(matches!(
            validate_actions(&recipe),
            Err(SchemaError::UnknownAction { ref action, .. }) if action == "first"
        ));
    }

    #[test]
    fn test_null_body_is_empty() {
        let recipe: Mapping = serde_yaml::from_str("clean:\n").unwrap();
        assert_eq!(validate_actions(&recipe), Ok(()));
    }

    #[test]
    fn test_scalar_body_is_rejected() {
        let recipe: Mapping = serde_yaml::from_str("clean: true\n").unwrap();
        assert_eq!(
            validate_actions(&recipe),
            Err(SchemaError::NotAMapping {
                action: "clean".to_string(),
                found: "bool",
            })
        );
    }

    #[test]
    fn test_non_string_key_is_rejected() {
        let recipe: Mapping = serde_yaml::from_str("1: {}\n").unwrap();
        assert_eq!(
            validate_actions(&recipe),
            Err(SchemaError::NonStringKey { found: "number" })
        );
    }
}
