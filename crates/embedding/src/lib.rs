pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod rate_limit;
pub mod retry;

mod jina;

use async_trait::async_trait;
use lodestone_core::EngineError;

pub use factory::{BackendSelection, FallbackInfo, create_backend};
pub use gemini::GeminiBackend;
pub use jina::JinaBackend;
pub use ollama::OllamaBackend;
pub use rate_limit::{RateLimitConfig, TokenBucket};
pub use retry::{FetchError, HttpClient, RetryPolicy};

/// Uniform interface over remote and local embedding services.
///
/// Ordering invariant: for every backend, `embed_batch(texts)[i]` is the
/// embedding of `texts[i]`.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
  /// Short backend name ("jina", "gemini", "ollama")
  fn name(&self) -> &str;

  /// Model identifier as configured
  fn model(&self) -> &str;

  /// Vector dimension, fixed at construction
  fn dimensions(&self) -> usize;

  /// Verify the backend is usable. Remote backends perform one size-1
  /// embedding request; the local backend checks the server and model list.
  async fn initialize(&self) -> Result<(), EmbeddingError>;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("configuration error: {0}")]
  Config(String),
  #[error(transparent)]
  Fetch(#[from] retry::FetchError),
  #[error("backend error: {0}")]
  Provider(String),
  #[error("embedding count mismatch: expected {expected}, got {got}")]
  BatchMismatch { expected: usize, got: usize },
  #[error("malformed response: {0}")]
  Decode(String),
}

impl EmbeddingError {
  /// Whether this failure should abort an entire indexing run rather than
  /// skip the current file. Quota exhaustion and auth failures will not
  /// heal on the next batch; transient transport errors may.
  pub fn is_terminal(&self) -> bool {
    match self {
      EmbeddingError::Config(_) => true,
      EmbeddingError::Fetch(retry::FetchError::Quota(_)) => true,
      EmbeddingError::Fetch(retry::FetchError::NonRetryable { status, .. }) => matches!(status, 401 | 403),
      _ => false,
    }
  }
}

impl From<EmbeddingError> for EngineError {
  fn from(err: EmbeddingError) -> Self {
    match err {
      EmbeddingError::Config(msg) => EngineError::Config(msg),
      EmbeddingError::Fetch(retry::FetchError::Quota(msg)) => EngineError::Quota(msg),
      EmbeddingError::Fetch(retry::FetchError::Timeout) => EngineError::Transport("request timed out".into()),
      EmbeddingError::Fetch(retry::FetchError::Transport(msg)) => EngineError::Transport(msg),
      other => EngineError::Backend(other.to_string()),
    }
  }
}

/// Vector dimension for known embedding models.
///
/// An unknown model is a construction-time configuration error unless the
/// config carries an explicit `dimensions` override; guessing a dimension
/// would silently corrupt any table created with it.
pub fn known_model_dimensions(model: &str) -> Option<usize> {
  let base = model.split(':').next().unwrap_or(model);
  match base {
    "jina-embeddings-v3" => Some(1024),
    "jina-embeddings-v2-base-code" => Some(768),
    "jina-code-embeddings-0.5b" => Some(896),
    "jina-code-embeddings-1.5b" => Some(1536),
    "text-embedding-004" | "models/text-embedding-004" => Some(768),
    "gemini-embedding-001" | "models/gemini-embedding-001" => Some(3072),
    "nomic-embed-text" => Some(768),
    "mxbai-embed-large" => Some(1024),
    "all-minilm" => Some(384),
    "snowflake-arctic-embed" => Some(1024),
    "qwen3-embedding" => Some(4096),
    "bge-m3" => Some(1024),
    _ => None,
  }
}

/// Resolve a model's dimension from the lookup table or an explicit
/// override, refusing to guess.
pub fn resolve_dimensions(model: &str, override_dim: Option<usize>) -> Result<usize, EmbeddingError> {
  override_dim.or_else(|| known_model_dimensions(model)).ok_or_else(|| {
    EmbeddingError::Config(format!(
      "unknown embedding model '{model}': set embedding.dimensions explicitly"
    ))
  })
}
