//! Query planning: parse options, filter, fetch candidates, mix scores,
//! shape results.

use std::{path::PathBuf, sync::Arc};

use db::{FilterBuilder, VectorStore};
use embedding::EmbeddingBackend;
use globset::Glob;
use index::ClusterSet;
use lodestone_core::{Chunk, EngineError, EngineResult, Language, SearchConfig};
use serde::Serialize;
use tracing::debug;

use crate::hybrid::{KeywordScorer, combine, rank_order};

/// Candidates fetched per requested result before re-ranking.
const OVERSAMPLE: usize = 4;

/// One search result row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
  pub id: String,
  pub filepath: String,
  pub content: String,
  pub start_line: u32,
  pub end_line: u32,
  pub language: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub symbol_name: Option<String>,
  pub symbol_kind: String,
  pub score: f32,
}

impl SearchHit {
  fn from_chunk(chunk: Chunk, score: f32) -> Self {
    Self {
      id: chunk.id,
      filepath: chunk.file_path,
      content: chunk.content,
      start_line: chunk.start_line,
      end_line: chunk.end_line,
      language: chunk.language.as_str().to_string(),
      symbol_name: chunk.symbol_name,
      symbol_kind: chunk.kind.as_str().to_string(),
      score,
    }
  }
}

/// Line-range or snippet similarity query.
#[derive(Debug, Clone, Default)]
pub struct SimilarQuery {
  /// Verbatim code to match; wins over the file range when both are set
  pub code: Option<String>,
  pub filepath: Option<String>,
  /// 1-based inclusive, used with `filepath`
  pub start_line: Option<u32>,
  pub end_line: Option<u32>,
  pub limit: usize,
  /// Drop results whose similarity falls below this
  pub threshold: Option<f32>,
  /// Best-effort removal of the source chunk, by exact id only
  pub exclude_self: bool,
}

/// Plans and executes searches against one index.
pub struct QueryPlanner {
  store: Arc<VectorStore>,
  backend: Arc<dyn EmbeddingBackend>,
  weights: SearchConfig,
  project_root: PathBuf,
}

impl QueryPlanner {
  pub fn new(
    store: Arc<VectorStore>,
    backend: Arc<dyn EmbeddingBackend>,
    weights: SearchConfig,
    project_root: PathBuf,
  ) -> Self {
    Self {
      store,
      backend,
      weights,
      project_root,
    }
  }

  async fn ensure_indexed(&self) -> EngineResult<()> {
    let count = self.store.count().await.map_err(EngineError::from)?;
    if count == 0 {
      return Err(EngineError::NotIndexed);
    }
    Ok(())
  }

  /// Hybrid search: vector candidates re-ranked with keyword scoring.
  pub async fn search(
    &self,
    query: &str,
    limit: usize,
    path_pattern: Option<&str>,
    languages: Option<&[Language]>,
  ) -> EngineResult<Vec<SearchHit>> {
    if query.trim().is_empty() {
      return Err(EngineError::validation("query must not be empty"));
    }
    let limit = limit.max(1);
    self.ensure_indexed().await?;

    // Queries are never retried here; a failed embedding fails the call
    let query_vector = self.backend.embed(query).await.map_err(EngineError::from)?;

    let path_matcher = match path_pattern {
      Some(pattern) => Some(
        Glob::new(pattern)
          .map_err(|e| EngineError::validation(format!("invalid path pattern '{pattern}': {e}")))?
          .compile_matcher(),
      ),
      None => None,
    };

    // Both filters narrow the candidate pool before the oversample cap:
    // language matches exactly in-store; the path glob pushes a LIKE
    // predicate down and keeps the exact match as a post-fetch refinement.
    let language_filter: Vec<String> = languages
      .map(|langs| langs.iter().map(|l| l.as_str().to_string()).collect())
      .unwrap_or_default();
    let mut builder = FilterBuilder::new().any_of("language", &language_filter);
    if let Some(like) = path_pattern.and_then(path_like_pattern) {
      builder = builder.like("file_path", &like);
    }
    let filter = builder.build();

    let k = (limit * OVERSAMPLE).max(limit);
    debug!(query, k, has_filter = filter.is_some(), "hybrid search");
    let candidates = self
      .store
      .knn(&query_vector, k, filter.as_deref())
      .await
      .map_err(EngineError::from)?;

    let scorer = KeywordScorer::new(query);
    let mut scored: Vec<SearchHit> = candidates
      .into_iter()
      .filter(|(chunk, _)| match (&path_matcher, path_pattern) {
        // Accept a plain-substring hit too, so "src/auth" works without glob syntax
        (Some(matcher), Some(pattern)) => matcher.is_match(&chunk.file_path) || chunk.file_path.contains(pattern),
        _ => true,
      })
      .map(|(chunk, vector_score)| {
        let keyword = scorer.score(&chunk.content, &chunk.file_path);
        let score = combine(vector_score, keyword, &self.weights);
        SearchHit::from_chunk(chunk, score)
      })
      .collect();

    sort_hits(&mut scored);
    scored.truncate(limit);
    Ok(scored)
  }

  /// Find chunks similar to a snippet or a file line range.
  pub async fn search_similar(&self, query: SimilarQuery) -> EngineResult<Vec<SearchHit>> {
    self.ensure_indexed().await?;
    let limit = query.limit.max(1);

    let (text, self_id) = self.resolve_similar_text(&query).await?;
    let vector = self.backend.embed(&text).await.map_err(EngineError::from)?;

    // Fetch one extra so dropping self cannot leave the caller short
    let k = (limit * OVERSAMPLE).max(limit) + 1;
    let candidates = self.store.knn(&vector, k, None).await.map_err(EngineError::from)?;

    let mut hits: Vec<SearchHit> = candidates
      .into_iter()
      .filter(|(_, similarity)| query.threshold.is_none_or(|t| *similarity >= t))
      .filter(|(chunk, _)| !(query.exclude_self && self_id.as_deref() == Some(chunk.id.as_str())))
      .map(|(chunk, similarity)| SearchHit::from_chunk(chunk, similarity))
      .collect();

    sort_hits(&mut hits);
    hits.truncate(limit);
    Ok(hits)
  }

  /// Search within one concept cluster.
  ///
  /// With a query, candidates are hybrid-scored; without one, they rank by
  /// similarity to the cluster centroid.
  pub async fn search_by_concept(
    &self,
    concept_id: i32,
    query: Option<&str>,
    limit: usize,
  ) -> EngineResult<Vec<SearchHit>> {
    self.ensure_indexed().await?;
    let limit = limit.max(1);

    let clusters_path = lodestone_core::Config::clusters_path(&self.project_root);
    let clusters = ClusterSet::load(&clusters_path)
      .map_err(EngineError::from)?
      .ok_or_else(|| EngineError::validation("no concept clusters computed yet; run clustering first"))?;
    let cluster = clusters
      .cluster(concept_id)
      .ok_or_else(|| EngineError::validation(format!("unknown concept id {concept_id}")))?;

    let filter = FilterBuilder::new().eq_int("concept_id", i64::from(concept_id)).build();
    let rows = self
      .store
      .list_chunks_with_vectors(filter.as_deref())
      .await
      .map_err(EngineError::from)?;

    let mut hits: Vec<SearchHit> = match query {
      Some(query) if !query.trim().is_empty() => {
        let query_vector = self.backend.embed(query).await.map_err(EngineError::from)?;
        let scorer = KeywordScorer::new(query);
        rows
          .into_iter()
          .map(|(chunk, vector)| {
            let semantic = cosine_similarity(&query_vector, &vector);
            let keyword = scorer.score(&chunk.content, &chunk.file_path);
            let score = combine(semantic, keyword, &self.weights);
            SearchHit::from_chunk(chunk, score)
          })
          .collect()
      }
      _ => rows
        .into_iter()
        .map(|(chunk, vector)| {
          let score = cosine_similarity(&cluster.centroid, &vector);
          SearchHit::from_chunk(chunk, score)
        })
        .collect(),
    };

    sort_hits(&mut hits);
    hits.truncate(limit);
    Ok(hits)
  }

  /// Resolve the text to embed for a similarity query, plus the id of the
  /// source chunk when the range lines up with one.
  async fn resolve_similar_text(&self, query: &SimilarQuery) -> EngineResult<(String, Option<String>)> {
    if let Some(code) = &query.code {
      if code.trim().is_empty() {
        return Err(EngineError::validation("code snippet must not be empty"));
      }
      return Ok((code.clone(), None));
    }

    let filepath = query
      .filepath
      .as_deref()
      .ok_or_else(|| EngineError::validation("either code or filepath must be provided"))?;
    let start = query
      .start_line
      .ok_or_else(|| EngineError::validation("start_line required with filepath"))?;
    let end = query
      .end_line
      .ok_or_else(|| EngineError::validation("end_line required with filepath"))?;
    if start == 0 || start > end {
      return Err(EngineError::validation(format!("invalid line range {start}-{end}")));
    }

    let absolute = self.project_root.join(filepath);
    let source = tokio::fs::read_to_string(&absolute)
      .await
      .map_err(|e| EngineError::validation(format!("reading {filepath}: {e}")))?;

    let lines: Vec<&str> = source.lines().collect();
    if start as usize > lines.len() {
      return Err(EngineError::validation(format!(
        "start_line {start} past end of {filepath} ({} lines)",
        lines.len()
      )));
    }
    let end_clamped = (end as usize).min(lines.len());
    let text = lines[(start as usize - 1)..end_clamped].join("\n");

    // Best-effort self id: exact range match only
    let self_id = Some(format!("{filepath}:{start}-{end}"));
    Ok((text, self_id))
  }
}

/// SQL LIKE push-down for a path pattern.
///
/// The predicate must never exclude a path the glob would accept, so it is
/// built only from text that appears verbatim in every match: a literal
/// prefix, a plain substring, or (for `*`/`?`-only patterns) the longest
/// literal run. Stray SQL wildcards inside that text only widen the match;
/// the exact glob still runs on the fetched rows.
fn path_like_pattern(pattern: &str) -> Option<String> {
  let is_meta = |c: char| matches!(c, '*' | '?' | '[' | '{');

  if !pattern.chars().any(is_meta) {
    // No glob syntax: plain substring
    return Some(format!("%{pattern}%"));
  }

  // Every glob match starts with the literal prefix verbatim
  let prefix: String = pattern.chars().take_while(|&c| !is_meta(c)).collect();
  if !prefix.is_empty() {
    return Some(format!("{prefix}%"));
  }

  // No prefix: a literal run is only a required substring when the pattern
  // has no class/alternation syntax
  if pattern.contains('[') || pattern.contains('{') {
    return None;
  }
  let longest = pattern.split(['*', '?']).max_by_key(|s| s.len()).unwrap_or("");
  if longest.len() >= 2 {
    Some(format!("%{longest}%"))
  } else {
    None
  }
}

fn sort_hits(hits: &mut [SearchHit]) {
  hits.sort_by(|a, b| {
    rank_order(
      &(a.score, a.filepath.as_str(), a.start_line),
      &(b.score, b.filepath.as_str(), b.start_line),
    )
  });
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
    return 0.0;
  }
  ((dot / (norm_a * norm_b)) + 1.0) / 2.0
}
