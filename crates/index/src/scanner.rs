//! File walking and change detection.
//!
//! The walker honors gitignore plus the configured include/exclude globs;
//! hashing runs in parallel because it dominates scan time on big trees.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use ignore::{WalkBuilder, overrides::OverrideBuilder};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::{IndexError, manifest::Manifest};

/// One file in the working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
  /// Path relative to the project root, with forward slashes
  pub relative_path: String,
  /// Hex SHA-256 of the file bytes
  pub content_hash: String,
  /// Absolute path for later reads
  pub absolute_path: PathBuf,
}

/// Changes of the current working set against the manifest.
#[derive(Debug, Default)]
pub struct ChangeSet {
  pub added: Vec<WalkedFile>,
  pub changed: Vec<WalkedFile>,
  /// Relative paths no longer present on disk
  pub removed: Vec<String>,
  pub unchanged: usize,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
  }

  /// Files that need chunking and embedding, added first then changed.
  pub fn work_list(&self) -> Vec<&WalkedFile> {
    self.added.iter().chain(self.changed.iter()).collect()
  }
}

/// Walk the project and hash every matching file.
///
/// Returns files sorted by relative path so runs are deterministic.
pub fn walk_files(root: &Path, patterns: &[String], excludes: &[String]) -> Result<Vec<WalkedFile>, IndexError> {
  let mut overrides = OverrideBuilder::new(root);
  for pattern in patterns {
    overrides.add(pattern).map_err(|e| IndexError::BadPattern {
      pattern: pattern.clone(),
      message: e.to_string(),
    })?;
  }
  for pattern in excludes {
    // Overrides use gitignore syntax: a leading ! whitelists, so an
    // exclude is the negation of the include form
    let negated = format!("!{pattern}");
    overrides.add(&negated).map_err(|e| IndexError::BadPattern {
      pattern: pattern.clone(),
      message: e.to_string(),
    })?;
  }
  let overrides = overrides.build()?;

  let walker = WalkBuilder::new(root)
    .overrides(overrides)
    .hidden(true)
    .git_ignore(true)
    .git_global(true)
    .git_exclude(true)
    .build();

  let candidates: Vec<PathBuf> = walker
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
    .map(|entry| entry.into_path())
    .collect();

  trace!(candidates = candidates.len(), "hashing candidate files");

  let mut files: Vec<WalkedFile> = candidates
    .par_iter()
    .filter_map(|path| {
      let bytes = std::fs::read(path).ok()?;
      let relative = path.strip_prefix(root).ok()?;
      Some(WalkedFile {
        relative_path: relative.to_string_lossy().replace('\\', "/"),
        content_hash: hash_bytes(&bytes),
        absolute_path: path.clone(),
      })
    })
    .collect();

  files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
  debug!(files = files.len(), "walk complete");
  Ok(files)
}

/// Stable content hash over file bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Classify the current working set against the previous manifest.
pub fn classify_changes(current: &[WalkedFile], manifest: &Manifest) -> ChangeSet {
  let current_paths: BTreeMap<&str, &WalkedFile> =
    current.iter().map(|f| (f.relative_path.as_str(), f)).collect();

  let mut changes = ChangeSet::default();

  for file in current {
    match manifest.files.get(&file.relative_path) {
      None => changes.added.push(file.clone()),
      Some(entry) if entry.hash != file.content_hash => changes.changed.push(file.clone()),
      Some(_) => changes.unchanged += 1,
    }
  }

  for path in manifest.files.keys() {
    if !current_paths.contains_key(path.as_str()) {
      changes.removed.push(path.clone());
    }
  }

  changes
}
