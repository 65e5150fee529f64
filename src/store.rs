//! JSON document loading and schema validation.
//!
//! Schemas live in the specs tree's `json_schema/` directory, one per
//! document kind. Two enumeration documents in the same directory,
//! `targets.enum.json` and `buildspecs.enum.json`, list every valid target
//! name and image recipe file name; they are injected into each schema as
//! `$defs.targets` / `$defs.buildspecs` so a schema whitelists with
//! `{"$ref": "#/$defs/targets"}`.

use anyhow::{bail, Context, Result};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::error::BuildError;

pub const TARGETS_ENUM_FILE: &str = "targets.enum.json";
pub const BUILDSPECS_ENUM_FILE: &str = "buildspecs.enum.json";

/// Kind of configuration document, selecting its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    TargetSpec,
    BuildSteps,
    EnvDefaults,
    DeveloperConfig,
}

impl DocumentKind {
    pub fn schema_file(self) -> &'static str {
        match self {
            DocumentKind::TargetSpec => "target_spec.schema.json",
            DocumentKind::BuildSteps => "build_steps.schema.json",
            DocumentKind::EnvDefaults => "environment.schema.json",
            DocumentKind::DeveloperConfig => "developer_config.schema.json",
        }
    }
}

/// Read and parse a JSON file.
pub fn load_json_value(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Read a JSON file into a typed document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let value = load_json_value(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("{} does not match the expected layout", path.display()))
}

/// Write an enumeration document (`{"enum": [...]}`).
pub fn write_enum(path: &Path, values: &[String]) -> Result<()> {
    let doc = json!({ "enum": values });
    let text = serde_json::to_string_pretty(&doc)?;
    fs::write(path, text + "\n").with_context(|| format!("Failed to write {}", path.display()))
}

/// Read the values of an enumeration document. Missing file = empty.
pub fn read_enum(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let doc = load_json_value(path)?;
    let values = doc
        .get("enum")
        .and_then(Value::as_array)
        .with_context(|| format!("{} has no \"enum\" array", path.display()))?;
    Ok(values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

fn load_schema(kind: DocumentKind, schema_dir: &Path) -> Result<Value> {
    let schema_path = schema_dir.join(kind.schema_file());
    let mut schema = load_json_value(&schema_path)?;

    let Some(obj) = schema.as_object_mut() else {
        bail!("Schema {} is not a JSON object", schema_path.display());
    };
    let defs = obj
        .entry("$defs")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Some(defs) = defs.as_object_mut() {
        for (name, file) in [("targets", TARGETS_ENUM_FILE), ("buildspecs", BUILDSPECS_ENUM_FILE)] {
            let enum_path = schema_dir.join(file);
            if enum_path.exists() {
                defs.insert(name.to_string(), load_json_value(&enum_path)?);
            }
        }
    }
    Ok(schema)
}

/// Validate the document at `path` against the schema for `kind`.
///
/// Returns the parsed document. A violation is reported as
/// [`BuildError::SchemaViolation`] naming the offending file.
pub fn validate_against_schema(path: &Path, kind: DocumentKind, schema_dir: &Path) -> Result<Value> {
    let doc = load_json_value(path)?;
    let schema = load_schema(kind, schema_dir)?;

    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .with_context(|| format!("Invalid schema {}", kind.schema_file()))?;

    let errors: Vec<String> = validator.iter_errors(&doc).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(BuildError::SchemaViolation {
            path: path.to_path_buf(),
            errors,
        }
        .into());
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema_dir() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let schema = json!({
            "type": "object",
            "required": ["target"],
            "properties": { "target": { "$ref": "#/$defs/targets" } }
        });
        fs::write(
            tmp.path().join(DocumentKind::TargetSpec.schema_file()),
            schema.to_string(),
        )
        .unwrap();
        write_enum(&tmp.path().join(TARGETS_ENUM_FILE), &["acme".to_string()]).unwrap();
        tmp
    }

    #[test]
    fn test_enum_whitelist_accepts_listed_value() {
        let dir = schema_dir();
        let doc = dir.path().join("acme_spec.json");
        fs::write(&doc, r#"{"target": "acme"}"#).unwrap();
        assert!(validate_against_schema(&doc, DocumentKind::TargetSpec, dir.path()).is_ok());
    }

    #[test]
    fn test_violation_names_offending_file() {
        let dir = schema_dir();
        let doc = dir.path().join("other_spec.json");
        fs::write(&doc, r#"{"target": "other"}"#).unwrap();
        let err = validate_against_schema(&doc, DocumentKind::TargetSpec, dir.path()).unwrap_err();
        assert!(err.to_string().contains("other_spec.json"));
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_enum_roundtrip_and_missing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.enum.json");
        assert!(read_enum(&path).unwrap().is_empty());
        write_enum(&path, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(read_enum(&path).unwrap(), ["a", "b"]);
    }
}
