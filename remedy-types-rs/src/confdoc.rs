// remedy-types-rs/src/confdoc.rs
// Dotted-path addressing into structured config documents.
//
// Supports JSON and TOML, chosen by file extension (anything that is not
// .toml is treated as JSON). Values cross the boundary as
// serde_json::Value so callers never handle both document models.

use std::path::Path;

use serde_json::Value;

/// Errors from config-document parsing and editing.
#[derive(Debug, thiserror::Error)]
pub enum ConfDocError {
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("failed to serialize {path}: {detail}")]
    Serialize { path: String, detail: String },

    #[error("key path {key} traverses a non-table value in {path}")]
    NotATable { path: String, key: String },
}

/// Document format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Json,
    Toml,
}

impl DocFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => DocFormat::Toml,
            _ => DocFormat::Json,
        }
    }
}

/// Read the value at a dotted-path key, or `None` if any level of the
/// path is missing.
pub fn get_key(path: &Path, raw: &str, key: &str) -> Result<Option<Value>, ConfDocError> {
    let doc = parse(path, raw)?;
    let mut cursor = &doc;
    for part in key.split('.') {
        match cursor.get(part) {
            Some(next) => cursor = next,
            None => return Ok(None),
        }
    }
    Ok(Some(cursor.clone()))
}

/// Set the value at a dotted-path key, creating missing intermediate
/// objects, and return the re-serialized document. An empty `raw`
/// (absent file) starts from an empty document.
pub fn set_key(path: &Path, raw: &str, key: &str, value: &Value) -> Result<String, ConfDocError> {
    let mut doc = if raw.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        parse(path, raw)?
    };

    let parts: Vec<&str> = key.split('.').collect();
    let mut cursor = &mut doc;
    for part in &parts[..parts.len() - 1] {
        if !cursor.is_object() {
            return Err(ConfDocError::NotATable {
                path: path.display().to_string(),
                key: key.to_string(),
            });
        }
        cursor = cursor
            .as_object_mut()
            .expect("checked is_object above")
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    match cursor.as_object_mut() {
        Some(map) => {
            map.insert(parts[parts.len() - 1].to_string(), value.clone());
        }
        None => {
            return Err(ConfDocError::NotATable {
                path: path.display().to_string(),
                key: key.to_string(),
            })
        }
    }

    serialize(path, &doc)
}

/// Remove the value at a dotted-path key and return the re-serialized
/// document. Removing an absent key returns the document unchanged.
pub fn remove_key(path: &Path, raw: &str, key: &str) -> Result<String, ConfDocError> {
    let mut doc = parse(path, raw)?;

    let parts: Vec<&str> = key.split('.').collect();
    let mut cursor = &mut doc;
    for part in &parts[..parts.len() - 1] {
        match cursor.get_mut(*part) {
            Some(next) => cursor = next,
            None => return serialize(path, &doc),
        }
    }
    if let Some(map) = cursor.as_object_mut() {
        map.remove(parts[parts.len() - 1]);
    }

    serialize(path, &doc)
}

fn parse(path: &Path, raw: &str) -> Result<Value, ConfDocError> {
    let as_err = |detail: String| ConfDocError::Parse {
        path: path.display().to_string(),
        detail,
    };

    match DocFormat::for_path(path) {
        DocFormat::Json => serde_json::from_str(raw).map_err(|e| as_err(e.to_string())),
        DocFormat::Toml => {
            let doc: toml::Value = toml::from_str(raw).map_err(|e| as_err(e.to_string()))?;
            serde_json::to_value(doc).map_err(|e| as_err(e.to_string()))
        }
    }
}

fn serialize(path: &Path, doc: &Value) -> Result<String, ConfDocError> {
    let as_err = |detail: String| ConfDocError::Serialize {
        path: path.display().to_string(),
        detail,
    };

    match DocFormat::for_path(path) {
        DocFormat::Json => serde_json::to_string_pretty(doc).map_err(|e| as_err(e.to_string())),
        DocFormat::Toml => {
            let doc: toml::Value =
                serde_json::from_value(doc.clone()).map_err(|e| as_err(e.to_string()))?;
            toml::to_string_pretty(&doc).map_err(|e| as_err(e.to_string()))
        }
    }
}
