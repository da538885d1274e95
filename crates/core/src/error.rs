//! Unified error taxonomy surfaced to callers of the engine.
//!
//! Crate-local errors (embedding, db, index, search) convert into
//! `EngineError` at the public surface so consumers can match on the kind
//! without knowing which layer failed.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Invalid or incompatible configuration (unknown model, dimension
  /// mismatch without force, bad globs).
  #[error("configuration error: {0}")]
  Config(String),

  /// Embedding backend initialization or operational failure after retries.
  #[error("embedding backend error: {0}")]
  Backend(String),

  /// Network/timeout failure that was not recovered by the retry layer.
  #[error("transport error: {0}")]
  Transport(String),

  /// Terminal quota exhaustion, distinct from transient rate limiting.
  #[error("quota exhausted: {0}")]
  Quota(String),

  /// A file could not be parsed; recoverable per file.
  #[error("parse error in {file}: {message}")]
  Parse { file: String, message: String },

  /// Vector store read/write failure.
  #[error("storage error: {0}")]
  Storage(String),

  /// Manifest and store disagree; recoverable by clear-and-rebuild.
  #[error("index corrupted: {0}")]
  Corruption(String),

  /// A query arrived before any index exists.
  #[error("no index found; run indexing first")]
  NotIndexed,

  /// A second indexing run was attempted while one is active.
  #[error("an indexing run is already in progress")]
  Busy,

  /// Malformed caller input.
  #[error("invalid input: {0}")]
  Validation(String),
}

impl EngineError {
  pub fn config(msg: impl Into<String>) -> Self {
    EngineError::Config(msg.into())
  }

  pub fn backend(msg: impl Into<String>) -> Self {
    EngineError::Backend(msg.into())
  }

  pub fn storage(msg: impl Into<String>) -> Self {
    EngineError::Storage(msg.into())
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    EngineError::Validation(msg.into())
  }

  pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
    EngineError::Parse {
      file: file.into(),
      message: message.into(),
    }
  }

  /// Whether the coordinator should abort the whole run on this error
  /// rather than skipping the current file.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      EngineError::Quota(_) | EngineError::Corruption(_) | EngineError::Config(_)
    )
  }
}
