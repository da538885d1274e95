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

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The batch endpoint caps requests per call; stay under it regardless of
/// the configured batch size.
const GEMINI_MAX_BATCH: usize = 100;

/// Remote paired backend for the Gemini embedding API.
///
/// Gemini exposes a single-text endpoint (`:embedContent`) and a batch
/// endpoint (`:batchEmbedContents`) with a small cap, so large inputs run
/// as sequential batches.
#[derive(Clone)]
pub struct GeminiBackend {
  http: HttpClient,
  limiter: Arc<TokenBucket>,
  policy: RetryPolicy,
  api_key: String,
  model: String,
  dimensions: usize,
  batch_size: usize,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
  parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
  text: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
  content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEntry<'a> {
  model: String,
  content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
  requests: Vec<BatchEntry<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
  values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
  embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
  embeddings: Vec<ContentEmbedding>,
}

impl GeminiBackend {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let api_key = std::env::var("GEMINI_API_KEY")
      .map_err(|_| EmbeddingError::Config("GEMINI_API_KEY not set in the environment".to_string()))?;
    let dimensions = crate::resolve_dimensions(&config.model, config.dimensions)?;

    info!(model = %config.model, dimensions, "Gemini backend configured");

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
      batch_size: config.batch_size.clamp(1, GEMINI_MAX_BATCH),
    })
  }

  fn single_url(&self) -> String {
    format!("{GEMINI_BASE}/{}:embedContent?key={}", self.model, self.api_key)
  }

  fn batch_url(&self) -> String {
    format!("{GEMINI_BASE}/{}:batchEmbedContents?key={}", self.model, self.api_key)
  }

  async fn embed_one_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.limiter.acquire().await;

    let request = BatchEmbedRequest {
      requests: texts
        .iter()
        .map(|text| BatchEntry {
          model: format!("models/{}", self.model),
          content: Content {
            parts: vec![Part { text }],
          },
        })
        .collect(),
    };

    trace!(batch_size = texts.len(), "sending Gemini batch embedding request");
    let response = self.http.post_json(&self.batch_url(), &[], &request, &self.policy).await?;

    let parsed: BatchEmbedResponse =
      serde_json::from_str(&response.body).map_err(|e| EmbeddingError::Decode(format!("Gemini response: {e}")))?;

    if parsed.embeddings.len() != texts.len() {
      return Err(EmbeddingError::BatchMismatch {
        expected: texts.len(),
        got: parsed.embeddings.len(),
      });
    }

    Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
  }
}

#[async_trait]
impl EmbeddingBackend for GeminiBackend {
  fn name(&self) -> &str {
    "gemini"
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn initialize(&self) -> Result<(), EmbeddingError> {
    let probe = self.embed("lodestone").await?;
    if probe.len() != self.dimensions {
      return Err(EmbeddingError::Config(format!(
        "model {} returned {} dimensions, expected {}",
        self.model,
        probe.len(),
        self.dimensions
      )));
    }
    Ok(())
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self.limiter.acquire().await;

    let request = EmbedContentRequest {
      content: Content {
        parts: vec![Part { text }],
      },
    };

    let response = self.http.post_json(&self.single_url(), &[], &request, &self.policy).await?;
    let parsed: EmbedContentResponse =
      serde_json::from_str(&response.body).map_err(|e| EmbeddingError::Decode(format!("Gemini response: {e}")))?;
    Ok(parsed.embedding.values)
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    // The server-side cap is small, so batches run sequentially rather
    // than in parallel; ordering falls out of the sequencing.
    debug!(total = texts.len(), batch_size = self.batch_size, "embedding batch via Gemini");
    let mut all = Vec::with_capacity(texts.len());
    for group in texts.chunks(self.batch_size) {
      all.extend(self.embed_one_batch(group).await?);
    }
    Ok(all)
  }
}
