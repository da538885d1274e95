//! Sidecar manifest: the record of indexed files and index metadata.
//!
//! The manifest is the coordinator's private state; it is saved with
//! write-temp-then-rename so readers never observe a half-written file.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::IndexError;

/// Per-file record: last indexed hash and the chunk ids it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
  pub hash: String,
  pub chunk_ids: Vec<String>,
}

/// Index metadata plus the file table.
///
/// The backend+model+dimension triple is immutable for the life of the
/// vector table; a mismatch with the active backend forces a full rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub schema_version: u32,
  pub backend: String,
  pub model: String,
  pub dimension: usize,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub files: BTreeMap<String, FileEntry>,
}

impl Manifest {
  pub fn new(backend: &str, model: &str, dimension: usize) -> Self {
    let now = Utc::now();
    Self {
      schema_version: lodestone_core::SCHEMA_VERSION,
      backend: backend.to_string(),
      model: model.to_string(),
      dimension,
      created_at: now,
      updated_at: now,
      files: BTreeMap::new(),
    }
  }

  /// Load the manifest, returning None when none has been written yet.
  pub fn load(path: &Path) -> Result<Option<Self>, IndexError> {
    if !path.exists() {
      return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let manifest: Manifest = serde_json::from_str(&raw)?;
    Ok(Some(manifest))
  }

  /// Atomically replace the manifest on disk.
  pub fn save(&self, path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), files = self.files.len(), "manifest saved");
    Ok(())
  }

  /// Whether this manifest was written by the given backend/model/dimension.
  pub fn matches_backend(&self, backend: &str, model: &str, dimension: usize) -> bool {
    self.backend == backend && self.model == model && self.dimension == dimension
  }

  /// Every chunk id across all files.
  pub fn all_chunk_ids(&self) -> impl Iterator<Item = &String> {
    self.files.values().flat_map(|entry| entry.chunk_ids.iter())
  }

  pub fn chunk_count(&self) -> usize {
    self.files.values().map(|entry| entry.chunk_ids.len()).sum()
  }

  pub fn touch(&mut self) {
    self.updated_at = Utc::now();
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");

    let mut manifest = Manifest::new("jina", "jina-embeddings-v3", 1024);
    manifest.files.insert(
      "src/a.ts".to_string(),
      FileEntry {
        hash: "abc".to_string(),
        chunk_ids: vec!["src/a.ts:1-10".to_string(), "src/a.ts:11-20".to_string()],
      },
    );
    manifest.save(&path).unwrap();

    let loaded = Manifest::load(&path).unwrap().unwrap();
    assert_eq!(loaded.backend, "jina");
    assert_eq!(loaded.dimension, 1024);
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(loaded.chunk_count(), 2);
    assert!(loaded.matches_backend("jina", "jina-embeddings-v3", 1024));
    assert!(!loaded.matches_backend("jina", "jina-embeddings-v3", 768));
  }

  #[test]
  fn test_missing_file_is_none() {
    let temp = TempDir::new().unwrap();
    assert!(Manifest::load(&temp.path().join("manifest.json")).unwrap().is_none());
  }

  #[test]
  fn test_camel_case_layout() {
    let manifest = Manifest::new("ollama", "nomic-embed-text", 768);
    let json = serde_json::to_string(&manifest).unwrap();
    assert!(json.contains("\"schemaVersion\""));
    assert!(json.contains("\"createdAt\""));
    assert!(json.contains("\"updatedAt\""));
  }

  #[test]
  fn test_save_leaves_no_temp_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    Manifest::new("ollama", "nomic-embed-text", 768).save(&path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
  }
}
