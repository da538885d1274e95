use std::sync::Arc;

use async_trait::async_trait;
use lodestone_core::config::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::{
  EmbeddingBackend, EmbeddingError,
  retry::{HttpClient, RetryPolicy},
};

/// Local batched backend for an Ollama server.
///
/// The batch endpoint accepts an input array; large inputs are split into
/// `batch_size` groups and up to `concurrency` groups run in parallel,
/// with output order restored by group index. The per-batch timeout is
/// minutes, not seconds, because model load dominates the first request.
#[derive(Clone)]
pub struct OllamaBackend {
  http: HttpClient,
  policy: RetryPolicy,
  base_url: String,
  model: String,
  dimensions: usize,
  batch_size: usize,
  concurrency: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
  models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
  name: String,
}

impl OllamaBackend {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let base_url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| config.ollama_url.clone());
    let dimensions = crate::resolve_dimensions(&config.model, config.dimensions)?;

    info!(
      model = %config.model,
      dimensions,
      base_url = %base_url,
      concurrency = config.concurrency,
      "Ollama backend configured"
    );

    Ok(Self {
      http: HttpClient::new(),
      policy: RetryPolicy::for_local(),
      base_url,
      model: config.model.clone(),
      dimensions,
      batch_size: config.batch_size.max(1),
      concurrency: config.concurrency.max(1),
    })
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }

  fn tags_url(&self) -> String {
    format!("{}/api/tags", self.base_url)
  }

  /// List models available on the server.
  pub async fn list_models(&self) -> Result<Vec<String>, EmbeddingError> {
    let response = reqwest::Client::new()
      .get(self.tags_url())
      .timeout(std::time::Duration::from_secs(5))
      .send()
      .await
      .map_err(|e| {
        EmbeddingError::Config(format!(
          "cannot reach Ollama at {}: {e}. Is the server running? Start it with `ollama serve` \
           or point embedding.ollama_url at it.",
          self.base_url
        ))
      })?;

    if !response.status().is_success() {
      return Err(EmbeddingError::Provider(format!(
        "Ollama returned {} when listing models",
        response.status()
      )));
    }

    let tags: TagsResponse = response
      .json()
      .await
      .map_err(|e| EmbeddingError::Decode(format!("Ollama tags response: {e}")))?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
  }

  async fn embed_one_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let request = EmbedRequest {
      model: &self.model,
      input: texts,
    };

    trace!(batch_size = texts.len(), "sending Ollama embedding request");
    let response = self.http.post_json(&self.embed_url(), &[], &request, &self.policy).await?;

    let parsed: EmbedResponse =
      serde_json::from_str(&response.body).map_err(|e| EmbeddingError::Decode(format!("Ollama response: {e}")))?;

    if parsed.embeddings.len() != texts.len() {
      return Err(EmbeddingError::BatchMismatch {
        expected: texts.len(),
        got: parsed.embeddings.len(),
      });
    }

    Ok(parsed.embeddings)
  }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn initialize(&self) -> Result<(), EmbeddingError> {
    let models = self.list_models().await?;
    let configured_available = models
      .iter()
      .any(|m| m.starts_with(&self.model) || self.model.starts_with(m.trim_end_matches(":latest")));

    if !configured_available {
      return Err(EmbeddingError::Config(format!(
        "model '{}' not found on Ollama at {}. Pull it with `ollama pull {}`. Available: [{}]",
        self.model,
        self.base_url,
        self.model,
        models.join(", ")
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

    let groups: Vec<Vec<String>> = texts
      .chunks(self.batch_size)
      .map(|group| group.iter().map(|s| s.to_string()).collect())
      .collect();

    if groups.len() == 1 {
      return self.embed_one_batch(texts).await;
    }

    debug!(
      total = texts.len(),
      groups = groups.len(),
      concurrency = self.concurrency,
      "embedding batch via Ollama"
    );

    // Run up to `concurrency` groups in flight; restitch by group index so
    // the output matches input order.
    let semaphore = Arc::new(Semaphore::new(self.concurrency));
    let futures: Vec<_> = groups
      .into_iter()
      .enumerate()
      .map(|(group_idx, group)| {
        let backend = self.clone();
        let semaphore = Arc::clone(&semaphore);
        async move {
          let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Provider("semaphore closed".to_string()))?;
          let refs: Vec<&str> = group.iter().map(String::as_str).collect();
          let embeddings = backend.embed_one_batch(&refs).await?;
          Ok::<_, EmbeddingError>((group_idx, embeddings))
        }
      })
      .collect();

    let results = futures::future::join_all(futures).await;

    let mut indexed: Vec<(usize, Vec<Vec<f32>>)> = Vec::with_capacity(results.len());
    for result in results {
      indexed.push(result?);
    }
    indexed.sort_by_key(|(idx, _)| *idx);

    let mut all = Vec::with_capacity(texts.len());
    for (_, embeddings) in indexed {
      all.extend(embeddings);
    }

    if all.len() != texts.len() {
      warn!(expected = texts.len(), got = all.len(), "Ollama batch size mismatch");
      return Err(EmbeddingError::BatchMismatch {
        expected: texts.len(),
        got: all.len(),
      });
    }

    Ok(all)
  }
}
