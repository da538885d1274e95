use std::sync::Arc;

use async_trait::async_trait;
use lodestone_core::config::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{
  EmbeddingBackend, EmbeddingError,
  rate_limit::{RateLimitConfig, TokenBucket},
  retry::{HttpClient, RetryPolicy},
};

const JINA_URL: &str = "https://api.jina.ai/v1/embeddings";

/// Remote batched backend for the Jina embeddings API.
///
/// A single batch endpoint takes up to `batch_size` texts; larger inputs
/// are split and every request passes through the shared token bucket.
#[derive(Clone)]
pub struct JinaBackend {
  http: HttpClient,
  limiter: Arc<TokenBucket>,
  policy: RetryPolicy,
  api_key: String,
  model: String,
  dimensions: usize,
  batch_size: usize,
}

#[derive(Debug, Serialize)]
struct JinaRequest<'a> {
  model: &'a str,
  input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct JinaResponse {
  data: Vec<JinaEmbedding>,
}

#[derive(Debug, Deserialize)]
struct JinaEmbedding {
  index: usize,
  embedding: Vec<f32>,
}

impl JinaBackend {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let api_key = std::env::var("JINA_API_KEY")
      .map_err(|_| EmbeddingError::Config("JINA_API_KEY not set in the environment".to_string()))?;
    let dimensions = crate::resolve_dimensions(&config.model, config.dimensions)?;

    info!(
      model = %config.model,
      dimensions,
      batch_size = config.batch_size,
      "Jina backend configured"
    );

    Ok(Self {
      http: HttpClient::new(),
      limiter: Arc::new(TokenBucket::new(RateLimitConfig::new(
        config.rate_limit_rps,
        config.rate_limit_burst,
      ))),
      policy: RetryPolicy::default(),
      api_key,
      model: config.model.clone(),
      dimensions,
      batch_size: config.batch_size.max(1),
    })
  }

  async fn embed_one_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.limiter.acquire().await;

    let request = JinaRequest {
      model: &self.model,
      input: texts,
    };
    let auth = format!("Bearer {}", self.api_key);

    trace!(batch_size = texts.len(), "sending Jina embedding request");
    let response = self
      .http
      .post_json(JINA_URL, &[("Authorization", auth.as_str())], &request, &self.policy)
      .await?;

    let parsed: JinaResponse = serde_json::from_str(&response.body).map_err(|e| {
      EmbeddingError::Decode(format!("Jina response: {e}"))
    })?;

    if parsed.data.len() != texts.len() {
      return Err(EmbeddingError::BatchMismatch {
        expected: texts.len(),
        got: parsed.data.len(),
      });
    }

    // The API documents input order, but it also labels every row with its
    // index; sort on it so a reordered response cannot scramble vectors.
    let mut data = parsed.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
  }
}

#[async_trait]
impl EmbeddingBackend for JinaBackend {
  fn name(&self) -> &str {
    "jina"
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn initialize(&self) -> Result<(), EmbeddingError> {
    let probe = self.embed_one_batch(&["lodestone"]).await?;
    let got = probe.first().map(Vec::len).unwrap_or(0);
    if got != self.dimensions {
      return Err(EmbeddingError::Config(format!(
        "model {} returned {got} dimensions, expected {}",
        self.model, self.dimensions
      )));
    }
    Ok(())
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let mut result = self.embed_one_batch(&[text]).await?;
    result
      .pop()
      .ok_or_else(|| EmbeddingError::Decode("empty embedding response".to_string()))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    debug!(total = texts.len(), batch_size = self.batch_size, "embedding batch via Jina");
    let mut all = Vec::with_capacity(texts.len());
    for group in texts.chunks(self.batch_size) {
      all.extend(self.embed_one_batch(group).await?);
    }
    Ok(all)
  }
}
