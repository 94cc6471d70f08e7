//! Typed view of a validated recipe.
//!
//! Values the pipeline uses verbatim (fingerprints, passwords, paths) must be
//! YAML strings. An unquoted `123e45` or `2024.10` would be read as a number
//! and could not be turned back into the text the operator wrote.

use serde::{Deserialize, Serialize};

/// Strongly typed recipe, one optional section per action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Recipe {
    #[serde(default, deserialize_with = "null_as_default")]
    pub connect: Option<ConnectAction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_container: Option<CreateContainerAction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub copy_files: Option<CopyFilesAction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub execute_script: Option<ExecuteScriptAction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_image: Option<CreateImageAction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clean: Option<CleanAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConnectAction {
    #[serde(default, deserialize_with = "quoted_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "quoted_string")]
    pub trust_password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CreateContainerAction {
    #[serde(default, deserialize_with = "quoted_string")]
    pub container_name: Option<String>,
    #[serde(default, deserialize_with = "quoted_string")]
    pub container_image_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CopyFilesAction {
    #[serde(default, deserialize_with = "quoted_string")]
    pub file_tarball: Option<String>,
    #[serde(default, deserialize_with = "quoted_string")]
    pub file_dest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExecuteScriptAction {
    #[serde(default, deserialize_with = "quoted_string")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CreateImageAction {
    #[serde(default, deserialize_with = "quoted_string")]
    pub destination: Option<String>,
}

/// Cleanup switches; every flag is off unless set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CleanAction {
    #[serde(default)]
    pub tmp_files: bool,
    #[serde(default)]
    pub container: bool,
    #[serde(default)]
    pub image_store: bool,
}

/// `clean:` with an empty body parses as YAML null; treat it as all defaults.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(Some(value.unwrap_or_default()))
}

/// Only accept YAML strings; anything else asks the operator to quote it.
fn quoted_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let found = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => return Ok(Some(s)),
        Some(Value::Number(_)) => "a number",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Sequence(_)) => "a sequence",
        Some(Value::Mapping(_)) => "a mapping",
        Some(Value::Tagged(_)) => "a tagged value",
    };
    Err(D::Error::custom(format!(
        "expected a string, found {}; quote the value so it is read verbatim",
        found
    )))
}
