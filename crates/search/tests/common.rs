//! Shared helpers for query planner integration tests.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use embedding::{EmbeddingBackend, EmbeddingError};
use index::{IndexCoordinator, IndexOptions};
use lodestone_core::Config;
use search::QueryPlanner;
use tokio_util::sync::CancellationToken;

pub const DIM: usize = 8;

/// Deterministic offline backend: vectors derive from byte content so
/// related texts land near each other and tests never touch the network.
pub struct StaticBackend;

impl StaticBackend {
  pub fn new() -> Arc<Self> {
    Arc::new(Self)
  }

  pub fn embed_text(text: &str) -> Vec<f32> {
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
    Ok(Self::embed_text(text))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
  }
}

pub fn write(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// Index the project at `root` and build a planner over the result.
pub async fn indexed_planner(root: &Path) -> (IndexCoordinator, QueryPlanner) {
  let coordinator = IndexCoordinator::initialize(root, Config::default(), StaticBackend::new(), None)
    .await
    .unwrap();
  coordinator
    .index_codebase(IndexOptions::default(), |_| {}, CancellationToken::new())
    .await
    .unwrap();

  let planner = QueryPlanner::new(
    coordinator.store_handle(),
    coordinator.backend(),
    coordinator.config().search.clone(),
    root.to_path_buf(),
  );
  (coordinator, planner)
}
