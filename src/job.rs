//! Job model: the unit of work handed to a task type, and its wire format.
//!
//! A job is produced and consumed by collaborators this crate doesn't
//! implement (the dispatcher, the relational model) — only the shape and
//! the JSON transcoding matter here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An opaque identifier for a blob in the external file cacher. Never
/// interpreted, only compared and passed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (logical filename, digest) pair. Files are contestant-supplied
/// sources; managers are admin-supplied auxiliaries; executables are
/// artifacts produced by a successful compilation. All three share this
/// shape, so one struct stands in for the reference's three classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub digest: Digest,
}

pub type File = FileInfo;
pub type Manager = FileInfo;
pub type Executable = FileInfo;

/// Metadata common to both job variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub task_type: String,
    pub task_type_parameters: serde_json::Value,
    pub info: String,
    #[serde(default)]
    pub sandboxes: Vec<String>,
    pub success: Option<bool>,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub plus: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationJob {
    #[serde(flatten)]
    pub meta: JobMeta,

    pub language: Option<String>,
    pub files: HashMap<String, File>,
    pub managers: HashMap<String, Manager>,

    pub compilation_success: Option<bool>,
    #[serde(default)]
    pub executables: HashMap<String, Executable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJob {
    #[serde(flatten)]
    pub meta: JobMeta,

    pub language: Option<String>,
    pub executables: HashMap<String, Executable>,
    pub input_digest: Digest,
    pub correct_output_digest: Option<Digest>,
    pub files: HashMap<String, File>,
    pub managers: HashMap<String, Manager>,
    pub time_limit_s: f64,
    pub memory_limit_bytes: u64,
    pub multithreaded_sandbox: bool,
    pub only_execution: bool,
    pub get_output: bool,
    /// Identifies the testcase this evaluation is for.
    pub operation: String,

    pub outcome: Option<String>,
    pub user_output: Option<Digest>,
}

/// Job as it crosses the dispatcher boundary: a tagged JSON object with the
/// type-specific fields flattened alongside the common ones, and
/// filename-keyed maps expanded into arrays (each element carries its own
/// filename).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    Compilation(CompilationJob),
    Evaluation(EvaluationJob),
}

impl CompilationJob {
    pub fn export_to_dict(&self) -> anyhow::Result<serde_json::Value> {
        let mut obj = serde_json::to_value(self)?;
        rehome_maps_to_arrays(&mut obj, &["files", "managers", "executables"])?;
        if let serde_json::Value::Object(map) = &mut obj {
            map.insert("type".to_string(), serde_json::Value::String("compilation".to_string()));
        }
        Ok(obj)
    }

    pub fn import_from_dict(value: serde_json::Value) -> anyhow::Result<CompilationJob> {
        let value = rehome_arrays_to_maps(value, &["files", "managers", "executables"])?;
        Ok(serde_json::from_value(value)?)
    }
}

impl EvaluationJob {
    pub fn export_to_dict(&self) -> anyhow::Result<serde_json::Value> {
        let mut obj = serde_json::to_value(self)?;
        rehome_maps_to_arrays(&mut obj, &["files", "managers", "executables"])?;
        if let serde_json::Value::Object(map) = &mut obj {
            map.insert("type".to_string(), serde_json::Value::String("evaluation".to_string()));
        }
        Ok(obj)
    }

    pub fn import_from_dict(value: serde_json::Value) -> anyhow::Result<EvaluationJob> {
        let value = rehome_arrays_to_maps(value, &["files", "managers", "executables"])?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Turn `{"files": {"a.cpp": {"filename": "a.cpp", "digest": "..."}}}` into
/// `{"files": [{"filename": "a.cpp", "digest": "..."}]}`, the wire shape.
fn rehome_maps_to_arrays(value: &mut serde_json::Value, keys: &[&str]) -> anyhow::Result<()> {
    let serde_json::Value::Object(obj) = value else {
        anyhow::bail!("expected a JSON object");
    };
    for key in keys {
        if let Some(serde_json::Value::Object(map)) = obj.get(*key) {
            let array: Vec<serde_json::Value> = map.values().cloned().collect();
            obj.insert(key.to_string(), serde_json::Value::Array(array));
        }
    }
    Ok(())
}

/// Inverse of [`rehome_maps_to_arrays`]: rehydrate filename-keyed maps from
/// arrays of `{"filename": ..., ...}` objects on import.
fn rehome_arrays_to_maps(mut value: serde_json::Value, keys: &[&str]) -> anyhow::Result<serde_json::Value> {
    let serde_json::Value::Object(obj) = &mut value else {
        anyhow::bail!("expected a JSON object");
    };
    for key in keys {
        if let Some(serde_json::Value::Array(items)) = obj.get(*key) {
            let mut map = serde_json::Map::new();
            for item in items {
                let filename = item
                    .get("filename")
                    .and_then(|f| f.as_str())
                    .ok_or_else(|| anyhow::anyhow!("{key} element missing filename"))?
                    .to_string();
                map.insert(filename, item.clone());
            }
            obj.insert(key.to_string(), serde_json::Value::Object(map));
        }
    }
    Ok(value)
}
