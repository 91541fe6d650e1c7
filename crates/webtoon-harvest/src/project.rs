//! Project-state document and its whole-document store.
//!
//! The editor owns the meaning of the document; this crate only needs its
//! outer shape. Known keys are typed loosely, everything else rides along in
//! `extra` so a load/save cycle never drops fields.
//!
//! Stores replace the whole document on every save. Callers that change one
//! field must load, merge, and save (see [`ProjectStore::update`]); two
//! writers racing on the same store will lose one side's edits.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::types::{HarvestError, HarvestResult};

/// Block types a fresh project starts with.
pub const DEFAULT_BLOCK_TYPES: &[&str] = &["HB", "B", "DB", "C", "HC"];

/// The editor's project record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub blocks: Vec<Value>,
    #[serde(rename = "blockTypes", default)]
    pub block_types: Vec<String>,
    #[serde(rename = "apiKeys", default)]
    pub api_keys: Map<String, Value>,
    #[serde(default)]
    pub glossary: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectState {
    /// State of a project that has never been saved.
    pub fn initial() -> Self {
        Self {
            block_types: DEFAULT_BLOCK_TYPES.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Build from an already-decoded JSON object.
    ///
    /// Missing or mistyped known keys fall back to empty values; unknown keys
    /// are kept verbatim.
    pub fn from_object(mut map: Map<String, Value>) -> Self {
        let blocks = match map.remove("blocks") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!("Ignoring non-array 'blocks' ({})", type_name(&other));
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut block_types: Vec<String> = Vec::new();
        match map.remove("blockTypes") {
            Some(Value::Array(items)) => {
                for t in items.into_iter().filter_map(|v| v.as_str().map(str::to_string)) {
                    if !block_types.contains(&t) {
                        block_types.push(t);
                    }
                }
            }
            Some(other) => warn!("Ignoring non-array 'blockTypes' ({})", type_name(&other)),
            None => {}
        }

        let api_keys = match map.remove("apiKeys") {
            Some(Value::Object(keys)) => keys,
            Some(other) => {
                warn!("Ignoring non-object 'apiKeys' ({})", type_name(&other));
                Map::new()
            }
            None => Map::new(),
        };

        let glossary = match map.remove("glossary") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!("Ignoring non-array 'glossary' ({})", type_name(&other));
                Vec::new()
            }
            None => Vec::new(),
        };

        Self {
            blocks,
            block_types,
            api_keys,
            glossary,
            extra: map,
        }
    }

    /// Decode a JSON value, which must be an object.
    pub fn from_value(value: Value) -> HarvestResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_object(map)),
            other => Err(HarvestError::structural(
                format!("project document is a JSON {}, expected an object", type_name(&other)),
                Vec::new(),
            )),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whole-document access to the persisted project state.
pub trait ProjectStore: Send + Sync {
    fn load(&self) -> HarvestResult<ProjectState>;

    /// Replace the stored document.
    fn save(&self, state: &ProjectState) -> HarvestResult<()>;

    /// Read-modify-write helper; the closure sees the freshest document.
    fn update(&self, f: &mut dyn FnMut(&mut ProjectState)) -> HarvestResult<ProjectState> {
        let mut state = self.load()?;
        f(&mut state);
        self.save(&state)?;
        Ok(state)
    }
}

/// Project state kept as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProjectStore for JsonFileStore {
    fn load(&self) -> HarvestResult<ProjectState> {
        if !self.path.exists() {
            return Ok(ProjectState::initial());
        }
        let parsed = std::fs::read(&self.path)
            .map_err(HarvestError::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<Value>(&bytes)?))
            .and_then(ProjectState::from_value);

        match parsed {
            Ok(state) => Ok(state),
            Err(e) => {
                error!("Error loading data from {}: {e}", self.path.display());
                Ok(ProjectState::initial())
            }
        }
    }

    fn save(&self, state: &ProjectState) -> HarvestResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let payload = serde_json::to_vec_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, &payload)?;
        tmp.persist(&self.path).map_err(|e| HarvestError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let state = ProjectState::from_value(json!({ "blocks": [{"type": "B"}] })).unwrap();
        assert_eq!(state.blocks.len(), 1);
        assert!(state.block_types.is_empty());
        assert!(state.api_keys.is_empty());
        assert!(state.glossary.is_empty());
    }

    #[test]
    fn test_mistyped_fields_default_and_extras_kept() {
        let state = ProjectState::from_value(json!({
            "blocks": "oops",
            "blockTypes": ["B", "B", "C", 4],
            "theme": "dark"
        }))
        .unwrap();
        assert!(state.blocks.is_empty());
        assert_eq!(state.block_types, vec!["B", "C"]);
        assert_eq!(state.extra.get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = ProjectState::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, HarvestError::ArchiveStructural { .. }));
    }

    #[test]
    fn test_serialized_field_names() {
        let mut state = ProjectState::initial();
        state.api_keys.insert("gemini".into(), json!("k"));
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["blockTypes"], json!(["HB", "B", "DB", "C", "HC"]));
        assert_eq!(v["apiKeys"]["gemini"], json!("k"));
        assert_eq!(ProjectState::from_value(v).unwrap(), state);
    }

    #[test]
    fn test_file_store_roundtrip_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data/project_data.json"));
        assert_eq!(store.load().unwrap(), ProjectState::initial());

        let updated = store
            .update(&mut |s: &mut ProjectState| s.glossary.push(json!({"term": "sunbae"})))
            .unwrap();
        assert_eq!(store.load().unwrap(), updated);
        assert_eq!(updated.glossary.len(), 1);
    }

    #[test]
    fn test_corrupt_file_loads_initial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project_data.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert_eq!(JsonFileStore::new(path).load().unwrap(), ProjectState::initial());
    }
}
