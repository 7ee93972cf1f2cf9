//! Persisted object state.
//!
//! The registry's objects are saved as one JSON document. Write-only fields
//! are kept apart under `secrets` so they never mix with replicated state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::types::ObjectId;

/// Current on-disk format version.
const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedObject {
    pub type_name: String,
    pub id: ObjectId,
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub secrets: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    objects: Vec<PersistedObject>,
}

/// JSON state file holding every persisted object.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved objects. A missing file is an empty state.
    pub fn load(&self) -> Result<Vec<PersistedObject>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let doc: StateDocument = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", self.path.display())))?;
        if doc.version != STATE_VERSION {
            return Err(StoreError::Corrupted(format!(
                "unsupported state version {}",
                doc.version
            )));
        }
        debug!(path = %self.path.display(), objects = doc.objects.len(), "state loaded");
        Ok(doc.objects)
    }

    /// Replace the state file. The document is written to a sibling temp file
    /// and renamed over the old one.
    pub fn save(&self, objects: &[PersistedObject]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let doc = StateDocument {
            version: STATE_VERSION,
            objects: objects.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), objects = objects.len(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(id: &str) -> PersistedObject {
        PersistedObject {
            type_name: "Connection".to_string(),
            id: ObjectId::from(id),
            fields: json!({"host": "db1", "port": 3306}).as_object().cloned().unwrap(),
            secrets: json!({"password": "pw"}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateFile::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateFile::new(dir.path().join("nested/state.json"));
        let objects = vec![object("a"), object("b")];
        store.save(&objects).unwrap();
        assert_eq!(store.load().unwrap(), objects);

        // Overwrite leaves no temp file behind.
        store.save(&objects[..1]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
        assert!(!dir.path().join("nested/state.tmp").exists());
    }

    #[test]
    fn test_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            StateFile::new(&path).load(),
            Err(StoreError::Corrupted(_))
        ));

        fs::write(&path, br#"{"version": 99, "objects": []}"#).unwrap();
        assert!(matches!(
            StateFile::new(&path).load(),
            Err(StoreError::Corrupted(_))
        ));
    }
}
