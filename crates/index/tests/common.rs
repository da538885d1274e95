//! Shared helpers for coordinator integration tests.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use embedding::{EmbeddingBackend, EmbeddingError};

pub const DIM: usize = 8;

/// Deterministic offline backend: vectors derive from a content hash, so
/// identical text always embeds identically and tests never touch the
/// network.
/// How a test backend should fail, if at all.
pub enum FailMode {
  None,
  /// Terminal: aborts a run
  Quota(String),
  /// Transient: batches are skipped, the run continues
  Transient(String),
}

pub struct StaticBackend {
  calls: AtomicUsize,
  fail: FailMode,
}

impl StaticBackend {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      calls: AtomicUsize::new(0),
      fail: FailMode::None,
    })
  }

  pub fn failing_with_quota(message: &str) -> Arc<Self> {
    Arc::new(Self {
      calls: AtomicUsize::new(0),
      fail: FailMode::Quota(message.to_string()),
    })
  }

  pub fn failing_transient(message: &str) -> Arc<Self> {
    Arc::new(Self {
      calls: AtomicUsize::new(0),
      fail: FailMode::Transient(message.to_string()),
    })
  }

  fn maybe_fail(&self) -> Result<(), EmbeddingError> {
    match &self.fail {
      FailMode::None => Ok(()),
      FailMode::Quota(message) => Err(EmbeddingError::Fetch(embedding::FetchError::Quota(message.clone()))),
      FailMode::Transient(message) => Err(EmbeddingError::Provider(message.clone())),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn embed_text(text: &str) -> Vec<f32> {
    // Cheap stable hash spread over DIM buckets
    let mut vector = vec![0.1f32; DIM];
    for (i, byte) in text.bytes().enumerate() {
      let slot = (i + byte as usize) % DIM;
      vector[slot] += (byte as f32) / 255.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    vector.iter().map(|x| x / norm).collect()
  }
}

#[async_trait]
impl EmbeddingBackend for StaticBackend {
  fn name(&self) -> &str {
    "static"
  }

  fn model(&self) -> &str {
    "static-test-model"
  }

  fn dimensions(&self) -> usize {
    DIM
  }

  async fn initialize(&self) -> Result<(), EmbeddingError> {
    Ok(())
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.maybe_fail()?;
    Ok(Self::embed_text(text))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.maybe_fail()?;
    Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
  }
}
