//! Configuration with per-project overrides.
//!
//! Config priority: project-relative (`.lodestone.toml`) > built-in
//! defaults. Every section has serde defaults so a partial file only
//! overrides what it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DATA_DIR_NAME, error::EngineError};

/// Include globs used when the config names none. Covers the common code
/// extensions handled by `Language::from_extension`.
pub const DEFAULT_PATTERNS: &[&str] = &[
  "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.mts", "**/*.cts", "**/*.mjs", "**/*.cjs", "**/*.rs",
  "**/*.py", "**/*.go", "**/*.java", "**/*.c", "**/*.h", "**/*.cpp", "**/*.rb", "**/*.sh", "**/*.md",
];

/// Exclude globs applied on top of gitignore handling.
pub const DEFAULT_EXCLUDES: &[&str] = &[
  "**/node_modules/**",
  "**/target/**",
  "**/dist/**",
  "**/build/**",
  "**/.git/**",
  "**/vendor/**",
  "**/__pycache__/**",
  "**/*.min.js",
];

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
  /// Try remote backends with available credentials, then local
  #[default]
  Auto,
  Jina,
  Gemini,
  Ollama,
}

impl EmbeddingBackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EmbeddingBackendKind::Auto => "auto",
      EmbeddingBackendKind::Jina => "jina",
      EmbeddingBackendKind::Gemini => "gemini",
      EmbeddingBackendKind::Ollama => "ollama",
    }
  }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Which backend to use
  pub backend: EmbeddingBackendKind,

  /// Model name (e.g. "jina-embeddings-v3", "nomic-embed-text")
  pub model: String,

  /// Explicit dimension override for models the lookup table does not know.
  /// Backends refuse to construct for an unknown model without this.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dimensions: Option<usize>,

  /// Maximum texts per embedding request
  pub batch_size: usize,

  /// Concurrent in-flight batches (local backend only)
  pub concurrency: usize,

  /// Steady request rate for remote backends (requests/second)
  pub rate_limit_rps: f64,

  /// Burst capacity for the rate limiter (requests)
  pub rate_limit_burst: usize,

  /// Ollama server URL (only used when backend = ollama or as fallback).
  /// `OLLAMA_URL` in the environment overrides this.
  pub ollama_url: String,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      backend: EmbeddingBackendKind::Auto,
      model: "nomic-embed-text".to_string(),
      dimensions: None,
      batch_size: 32,
      concurrency: 4,
      rate_limit_rps: 5.0,
      rate_limit_burst: 10,
      ollama_url: "http://127.0.0.1:11434".to_string(),
    }
  }
}

/// Line-window chunker configuration (non-AST languages)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
  /// Lines per window
  pub max_lines: usize,
  /// Lines of overlap between consecutive windows
  pub overlap: usize,
}

impl Default for ChunkingConfig {
  fn default() -> Self {
    Self {
      max_lines: 100,
      overlap: 20,
    }
  }
}

/// Hybrid-search weighting. The weights are independent knobs and are not
/// required to sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub semantic_weight: f32,
  pub keyword_weight: f32,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      semantic_weight: 0.7,
      keyword_weight: 0.3,
    }
  }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  /// Include globs; empty means `DEFAULT_PATTERNS`
  pub patterns: Vec<String>,
  /// Exclude globs; empty means `DEFAULT_EXCLUDES`
  pub exclude_patterns: Vec<String>,
  pub chunking: ChunkingConfig,
  pub search: SearchConfig,
  pub embedding: EmbeddingConfig,
}

impl Config {
  /// Load config for a project directory, falling back to defaults when no
  /// config file exists. A malformed file is an error rather than a silent
  /// fallback.
  pub fn load_for_project(project_root: &Path) -> Result<Self, EngineError> {
    let path = project_root.join(".lodestone.toml");
    if !path.exists() {
      return Ok(Self::default());
    }
    let raw =
      std::fs::read_to_string(&path).map_err(|e| EngineError::config(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| EngineError::config(format!("parsing {}: {e}", path.display())))
  }

  /// Effective include globs
  pub fn patterns(&self) -> Vec<String> {
    if self.patterns.is_empty() {
      DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect()
    } else {
      self.patterns.clone()
    }
  }

  /// Effective exclude globs
  pub fn exclude_patterns(&self) -> Vec<String> {
    if self.exclude_patterns.is_empty() {
      DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
    } else {
      self.exclude_patterns.clone()
    }
  }

  /// Root of all persisted state for a project
  pub fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join(DATA_DIR_NAME)
  }

  /// LanceDB table directory
  pub fn vectors_dir(project_root: &Path) -> PathBuf {
    Self::data_dir(project_root).join("vectors")
  }

  /// Sidecar manifest path
  pub fn manifest_path(project_root: &Path) -> PathBuf {
    Self::data_dir(project_root).join("manifest.json")
  }

  /// Sidecar cluster path
  pub fn clusters_path(project_root: &Path) -> PathBuf {
    Self::data_dir(project_root).join("clusters.json")
  }

  /// Append-only usage counter path
  pub fn usage_path(project_root: &Path) -> PathBuf {
    Self::data_dir(project_root).join("usage.json")
  }
}
