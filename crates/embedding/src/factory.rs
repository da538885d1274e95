// Backend selection with fallback to the local server.
//
// Selection rules, in order:
// 1. Explicitly named backend: initialize it; on failure fall back to
//    Ollama and record what happened. If both fail, surface the ORIGINAL
//    error so the operator debugs the backend they asked for.
// 2. Auto: remotes with credentials present (Jina, then Gemini), then
//    Ollama; first successful initialize wins.

use std::sync::Arc;

use lodestone_core::config::{EmbeddingBackendKind, EmbeddingConfig};
use serde::Serialize;
use tracing::{info, warn};

use crate::{EmbeddingBackend, EmbeddingError, GeminiBackend, JinaBackend, OllamaBackend};

/// Record of a backend substitution, surfaced so external observers can
/// report that the requested backend was not usable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FallbackInfo {
  pub original: String,
  pub fallback: String,
  pub reason: String,
}

/// The selected backend plus fallback info when a substitution happened.
pub struct BackendSelection {
  pub backend: Arc<dyn EmbeddingBackend>,
  pub fallback: Option<FallbackInfo>,
}

/// Build and initialize the backend named by the config.
pub async fn create_backend(config: &EmbeddingConfig) -> Result<BackendSelection, EmbeddingError> {
  match config.backend {
    EmbeddingBackendKind::Jina => with_local_fallback(config, "jina", build_jina(config)).await,
    EmbeddingBackendKind::Gemini => with_local_fallback(config, "gemini", build_gemini(config)).await,
    EmbeddingBackendKind::Ollama => {
      let backend = build_ollama(config)?;
      backend.initialize().await?;
      Ok(BackendSelection {
        backend,
        fallback: None,
      })
    }
    EmbeddingBackendKind::Auto => auto_select(config).await,
  }
}

fn build_jina(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
  Ok(Arc::new(JinaBackend::new(config)?))
}

fn build_gemini(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
  Ok(Arc::new(GeminiBackend::new(config)?))
}

fn build_ollama(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
  // When falling back from a remote backend the configured model is a
  // remote model name; the local default keeps the fallback usable.
  let local_config = EmbeddingConfig {
    model: if config.backend == EmbeddingBackendKind::Ollama {
      config.model.clone()
    } else {
      "nomic-embed-text".to_string()
    },
    dimensions: if config.backend == EmbeddingBackendKind::Ollama {
      config.dimensions
    } else {
      None
    },
    ..config.clone()
  };
  Ok(Arc::new(OllamaBackend::new(&local_config)?))
}

async fn with_local_fallback(
  config: &EmbeddingConfig,
  original_name: &str,
  built: Result<Arc<dyn EmbeddingBackend>, EmbeddingError>,
) -> Result<BackendSelection, EmbeddingError> {
  let original_err = match built {
    Ok(backend) => match backend.initialize().await {
      Ok(()) => {
        info!(backend = original_name, model = backend.model(), "embedding backend ready");
        return Ok(BackendSelection {
          backend,
          fallback: None,
        });
      }
      Err(e) => e,
    },
    Err(e) => e,
  };

  warn!(
    backend = original_name,
    error = %original_err,
    "requested backend failed, attempting local fallback"
  );

  let fallback_attempt = async {
    let backend = build_ollama(config)?;
    backend.initialize().await?;
    Ok::<_, EmbeddingError>(backend)
  };

  match fallback_attempt.await {
    Ok(backend) => {
      info!(fallback = backend.name(), model = backend.model(), "local fallback backend ready");
      Ok(BackendSelection {
        fallback: Some(FallbackInfo {
          original: original_name.to_string(),
          fallback: backend.name().to_string(),
          reason: original_err.to_string(),
        }),
        backend,
      })
    }
    Err(fallback_err) => {
      warn!(error = %fallback_err, "local fallback also failed");
      Err(original_err)
    }
  }
}

async fn auto_select(config: &EmbeddingConfig) -> Result<BackendSelection, EmbeddingError> {
  let mut last_err: Option<EmbeddingError> = None;

  if std::env::var("JINA_API_KEY").is_ok() {
    match try_init(build_jina(config)).await {
      Ok(backend) => {
        return Ok(BackendSelection {
          backend,
          fallback: None,
        });
      }
      Err(e) => {
        warn!(error = %e, "auto-select: Jina failed");
        last_err = Some(e);
      }
    }
  }

  if std::env::var("GEMINI_API_KEY").is_ok() {
    match try_init(build_gemini(config)).await {
      Ok(backend) => {
        return Ok(BackendSelection {
          backend,
          fallback: None,
        });
      }
      Err(e) => {
        warn!(error = %e, "auto-select: Gemini failed");
        last_err = Some(e);
      }
    }
  }

  match try_init(build_ollama(config)).await {
    Ok(backend) => Ok(BackendSelection {
      backend,
      fallback: None,
    }),
    Err(e) => {
      warn!(error = %e, "auto-select: Ollama failed");
      Err(last_err.unwrap_or(e))
    }
  }
}

async fn try_init(
  built: Result<Arc<dyn EmbeddingBackend>, EmbeddingError>,
) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
  let backend = built?;
  backend.initialize().await?;
  info!(backend = backend.name(), model = backend.model(), "embedding backend ready");
  Ok(backend)
}
