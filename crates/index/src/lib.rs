pub mod chunker;
pub mod cluster;
pub mod coordinator;
pub mod manifest;
pub mod scanner;
pub mod usage;

pub use chunker::{Chunker, ChunkerConfig};
pub use cluster::{ClusterConfig, ClusterSet, ConceptCluster};
pub use coordinator::{IndexCoordinator, IndexOptions, IndexOutcome, IndexStatus, ProgressEvent};
pub use manifest::{FileEntry, Manifest};
pub use scanner::{ChangeSet, WalkedFile, classify_changes, walk_files};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("walk error: {0}")]
  Walk(#[from] ignore::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("parse error in {file}: {message}")]
  Parse { file: String, message: String },
  #[error("invalid glob pattern '{pattern}': {message}")]
  BadPattern { pattern: String, message: String },
}

impl From<IndexError> for lodestone_core::EngineError {
  fn from(err: IndexError) -> Self {
    match err {
      IndexError::Parse { file, message } => lodestone_core::EngineError::Parse { file, message },
      IndexError::BadPattern { pattern, message } => {
        lodestone_core::EngineError::Config(format!("invalid glob pattern '{pattern}': {message}"))
      }
      other => lodestone_core::EngineError::Storage(other.to_string()),
    }
  }
}
