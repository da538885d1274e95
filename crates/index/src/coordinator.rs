//! Index coordinator: orchestrates walking, chunking, embedding and store
//! writes, and owns the manifest.
//!
//! One coordinator per index. A single `index_codebase` runs at a time;
//! searches may proceed concurrently and observe pre- or post-upsert rows
//! per chunk id.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use db::VectorStore;
use embedding::{EmbeddingBackend, FallbackInfo};
use lodestone_core::{Chunk, Config, EngineError, EngineResult, Language};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  chunker::{Chunker, ChunkerConfig},
  cluster::{ClusterConfig, ClusterSet, cluster_chunks},
  manifest::{FileEntry, Manifest},
  scanner::{self, WalkedFile},
  usage::UsageLog,
};

/// Embedding texts longer than this are truncated; the stored chunk keeps
/// its full content.
const MAX_EMBED_CHARS: usize = 8000;

/// Manifest ids sampled during integrity checks.
const INTEGRITY_SAMPLE: usize = 8;

/// Missing sampled ids tolerated before the index counts as corrupted.
const INTEGRITY_THRESHOLD: usize = 2;

/// Options for one indexing pass.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
  /// Include globs; None uses the configured patterns
  pub patterns: Option<Vec<String>>,
  /// Exclude globs; None uses the configured excludes
  pub excludes: Option<Vec<String>>,
  /// Treat every file as new and rebuild from scratch
  pub force_reindex: bool,
  /// Clear and rebuild when the store and manifest disagree
  pub auto_repair: bool,
}

/// Progress events, emitted in phase order. Within a phase, `current` is
/// monotonically non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
  Scanning,
  Chunking { current: usize, total: usize },
  Embedding { current: usize, total: usize },
  Writing,
  Finalizing,
}

/// Result of one indexing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
  pub files_indexed: usize,
  pub chunks_created: usize,
  /// Whether this pass reused prior state instead of rebuilding
  pub incremental: bool,
  /// Whether a corrupted index was cleared first
  pub repaired: bool,
  /// Whether the pass stopped early at a cancellation checkpoint
  pub cancelled: bool,
}

/// Snapshot of index health.
#[derive(Debug, Clone)]
pub struct IndexStatus {
  pub files: usize,
  pub chunks_in_manifest: usize,
  pub chunks_in_store: usize,
  pub backend: String,
  pub model: String,
  pub dimension: usize,
  pub dimension_mismatch: bool,
  /// Reason the index counts as corrupted, when it does
  pub corrupted: Option<String>,
  pub fallback: Option<FallbackInfo>,
  pub indexing: bool,
}

pub struct IndexCoordinator {
  project_root: PathBuf,
  config: Config,
  backend: Arc<dyn EmbeddingBackend>,
  fallback: Option<FallbackInfo>,
  store: Arc<VectorStore>,
  manifest: Mutex<Manifest>,
  /// Set when stored metadata disagrees with the active backend/model/D;
  /// cleared by a forced rebuild.
  dimension_mismatch: AtomicBool,
  /// Serializes indexing runs; a held lock means a run is active.
  index_lock: Mutex<()>,
  chunker: Chunker,
  cluster_config: ClusterConfig,
  usage: UsageLog,
}

impl IndexCoordinator {
  /// Open the store and load the manifest, moving to the Ready state.
  ///
  /// A manifest whose backend/model/dimension disagrees with the active
  /// backend marks the index as mismatched; indexing then requires
  /// `force_reindex`.
  pub async fn initialize(
    project_root: &Path,
    config: Config,
    backend: Arc<dyn EmbeddingBackend>,
    fallback: Option<FallbackInfo>,
  ) -> EngineResult<Self> {
    let data_dir = Config::data_dir(project_root);
    tokio::fs::create_dir_all(&data_dir)
      .await
      .map_err(|e| EngineError::storage(format!("creating {}: {e}", data_dir.display())))?;

    let manifest_path = Config::manifest_path(project_root);
    let loaded = Manifest::load(&manifest_path).map_err(EngineError::from)?;

    let mismatch = loaded
      .as_ref()
      .is_some_and(|m| !m.matches_backend(backend.name(), backend.model(), backend.dimensions()));
    if mismatch {
      let m = loaded.as_ref().expect("mismatch implies manifest");
      warn!(
        stored_backend = %m.backend,
        stored_model = %m.model,
        stored_dimension = m.dimension,
        active_backend = backend.name(),
        active_model = backend.model(),
        active_dimension = backend.dimensions(),
        "index metadata disagrees with active backend; force reindex required"
      );
    }

    let manifest = loaded.unwrap_or_else(|| Manifest::new(backend.name(), backend.model(), backend.dimensions()));
    let store = Arc::new(
      VectorStore::open_or_create(&Config::vectors_dir(project_root), backend.dimensions())
        .await
        .map_err(EngineError::from)?,
    );

    info!(
      project = %project_root.display(),
      backend = backend.name(),
      model = backend.model(),
      dimension = backend.dimensions(),
      "index coordinator ready"
    );

    Ok(Self {
      project_root: project_root.to_path_buf(),
      chunker: Chunker::new(ChunkerConfig::from_config(&config)),
      usage: UsageLog::new(Config::usage_path(project_root)),
      config,
      backend,
      fallback,
      store,
      manifest: Mutex::new(manifest),
      dimension_mismatch: AtomicBool::new(mismatch),
      index_lock: Mutex::new(()),
      cluster_config: ClusterConfig::default(),
    })
  }

  pub fn store(&self) -> &VectorStore {
    &self.store
  }

  /// Shared handle for collaborators such as the query planner.
  pub fn store_handle(&self) -> Arc<VectorStore> {
    Arc::clone(&self.store)
  }

  pub fn backend(&self) -> Arc<dyn EmbeddingBackend> {
    Arc::clone(&self.backend)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn fallback(&self) -> Option<&FallbackInfo> {
    self.fallback.as_ref()
  }

  pub fn project_root(&self) -> &Path {
    &self.project_root
  }

  /// Run one indexing pass over the project.
  pub async fn index_codebase<F>(
    &self,
    options: IndexOptions,
    on_progress: F,
    cancel: CancellationToken,
  ) -> EngineResult<IndexOutcome>
  where
    F: Fn(ProgressEvent) + Send + Sync,
  {
    let _guard = self.index_lock.try_lock().map_err(|_| EngineError::Busy)?;

    let mismatch = self.dimension_mismatch.load(Ordering::Acquire);
    if mismatch && !options.force_reindex {
      return Err(EngineError::config(
        "stored index was built with a different backend/model/dimension; rerun with force_reindex",
      ));
    }

    on_progress(ProgressEvent::Scanning);

    let root = self.project_root.clone();
    let patterns = options.patterns.clone().unwrap_or_else(|| self.config.patterns());
    let excludes = options.excludes.clone().unwrap_or_else(|| self.config.exclude_patterns());
    let walked = tokio::task::spawn_blocking(move || scanner::walk_files(&root, &patterns, &excludes))
      .await
      .map_err(|e| EngineError::storage(format!("walk task failed: {e}")))?
      .map_err(EngineError::from)?;

    debug!(files = walked.len(), "scan complete");

    // Repair before classification so a corrupted manifest cannot poison
    // the change detection.
    let mut repaired = false;
    if options.auto_repair
      && let Some(reason) = self.integrity_problem().await?
    {
      warn!(reason = %reason, "index corrupted; clearing for rebuild");
      self.clear_state().await?;
      repaired = true;
    }

    let prior_non_empty = { !self.manifest.lock().await.files.is_empty() };
    let force_all = options.force_reindex || mismatch || repaired;

    if options.force_reindex || mismatch {
      self.clear_state().await?;
      self.dimension_mismatch.store(false, Ordering::Release);
    }

    let snapshot = self.manifest.lock().await.clone();
    let changes = scanner::classify_changes(&walked, &snapshot);
    info!(
      added = changes.added.len(),
      changed = changes.changed.len(),
      removed = changes.removed.len(),
      unchanged = changes.unchanged,
      force = force_all,
      "change classification"
    );

    // Removed files: drop their chunks and manifest entries
    for path in &changes.removed {
      self.store.delete_by_file(path).await.map_err(EngineError::from)?;
      self.manifest.lock().await.files.remove(path);
    }

    let changed_paths: Vec<String> = changes.changed.iter().map(|f| f.relative_path.clone()).collect();
    let work: Vec<WalkedFile> = changes.work_list().into_iter().cloned().collect();

    // Chunking phase
    let total_files = work.len();
    let mut cancelled = false;
    let mut chunked: Vec<(WalkedFile, Vec<Chunk>)> = Vec::with_capacity(total_files);
    for (i, file) in work.into_iter().enumerate() {
      if cancel.is_cancelled() {
        cancelled = true;
        break;
      }

      let source = match tokio::fs::read_to_string(&file.absolute_path).await {
        Ok(source) => source,
        Err(e) => {
          warn!(file = %file.relative_path, error = %e, "skipping unreadable file");
          continue;
        }
      };

      let language = file
        .relative_path
        .rsplit('.')
        .next()
        .and_then(Language::from_extension)
        .unwrap_or(Language::Other);

      let chunks = self
        .chunker
        .chunk(&source, &file.relative_path, language, &file.content_hash);
      on_progress(ProgressEvent::Chunking {
        current: i + 1,
        total: total_files,
      });
      chunked.push((file, chunks));
    }

    // Embedding + write pipeline: buffer chunks across files, flush by size
    let total_chunks: usize = chunked.iter().map(|(_, c)| c.len()).sum();
    let mut buffer: Vec<(usize, Chunk)> = Vec::new();
    let mut flush_state = FlushState {
      embedded: 0,
      chunks_created: 0,
      files_indexed: 0,
      total_chunks,
      remaining: chunked.iter().map(|(_, c)| c.len()).collect(),
    };
    let batch_size = self.config.embedding.batch_size.max(1);

    for (file_idx, (file, chunks)) in chunked.iter().enumerate() {
      if cancel.is_cancelled() {
        cancelled = true;
        break;
      }

      if chunks.is_empty() {
        // Empty files still get a manifest entry so they stop showing as added
        let mut manifest = self.manifest.lock().await;
        manifest.files.insert(
          file.relative_path.clone(),
          FileEntry {
            hash: file.content_hash.clone(),
            chunk_ids: Vec::new(),
          },
        );
        flush_state.files_indexed += 1;
        continue;
      }

      // Full replace: a changed file's old chunks go before the new arrive
      if changed_paths.contains(&file.relative_path) {
        self.store.delete_by_file(&file.relative_path).await.map_err(EngineError::from)?;
      }

      for chunk in chunks {
        buffer.push((file_idx, chunk.clone()));
        if buffer.len() >= batch_size {
          self.flush_batch(&mut buffer, &mut flush_state, &chunked, &on_progress).await?;
        }
      }
    }

    // Drain the tail
    on_progress(ProgressEvent::Writing);
    self.flush_batch(&mut buffer, &mut flush_state, &chunked, &on_progress).await?;

    let FlushState {
      chunks_created,
      files_indexed,
      ..
    } = flush_state;

    on_progress(ProgressEvent::Finalizing);
    {
      let mut manifest = self.manifest.lock().await;
      manifest.touch();
      manifest.save(&Config::manifest_path(&self.project_root)).map_err(EngineError::from)?;
    }
    self.usage.record("index", chunks_created);

    info!(files_indexed, chunks_created, cancelled, "indexing pass complete");

    Ok(IndexOutcome {
      files_indexed,
      chunks_created,
      incremental: !force_all && prior_non_empty,
      repaired,
      cancelled,
    })
  }

  /// Report index health, optionally probing the store for sampled
  /// manifest chunk ids.
  pub async fn status(&self, verify: bool) -> EngineResult<IndexStatus> {
    let indexing = self.index_lock.try_lock().is_err();
    let manifest = self.manifest.lock().await.clone();
    let chunks_in_store = self.store.count().await.map_err(EngineError::from)?;

    let corrupted = if verify { self.integrity_problem().await? } else { None };

    Ok(IndexStatus {
      files: manifest.files.len(),
      chunks_in_manifest: manifest.chunk_count(),
      chunks_in_store,
      backend: self.backend.name().to_string(),
      model: self.backend.model().to_string(),
      dimension: self.backend.dimensions(),
      dimension_mismatch: self.dimension_mismatch.load(Ordering::Acquire),
      corrupted,
      fallback: self.fallback.clone(),
      indexing,
    })
  }

  /// Check manifest/store agreement on a small sample.
  async fn integrity_problem(&self) -> EngineResult<Option<String>> {
    let manifest = self.manifest.lock().await.clone();
    let manifest_chunks = manifest.chunk_count();
    let store_chunks = self.store.count().await.map_err(EngineError::from)?;

    if manifest_chunks == 0 && store_chunks == 0 {
      return Ok(None);
    }
    if manifest_chunks == 0 || store_chunks == 0 {
      return Ok(Some(format!(
        "manifest lists {manifest_chunks} chunks but store holds {store_chunks}"
      )));
    }

    let ids: Vec<&String> = manifest.all_chunk_ids().collect();
    let step = (ids.len() / INTEGRITY_SAMPLE).max(1);
    let mut missing = 0usize;
    let mut sampled = 0usize;
    for id in ids.iter().step_by(step).take(INTEGRITY_SAMPLE) {
      sampled += 1;
      if !self.store.contains_id(id).await.map_err(EngineError::from)? {
        missing += 1;
      }
    }

    if missing >= INTEGRITY_THRESHOLD {
      return Ok(Some(format!("{missing} of {sampled} sampled chunk ids missing from store")));
    }
    Ok(None)
  }

  /// Compute (or return memoized) concept clusters.
  ///
  /// Recomputes when the chunk count has drifted past the configured
  /// fraction or when `force` is set; assignments are written back to the
  /// store's concept_id column.
  pub async fn concepts(&self, force: bool) -> EngineResult<ClusterSet> {
    let count = self.store.count().await.map_err(EngineError::from)?;
    if count == 0 {
      return Err(EngineError::NotIndexed);
    }

    let path = Config::clusters_path(&self.project_root);
    if !force
      && let Some(existing) = ClusterSet::load(&path).map_err(EngineError::from)?
      && !existing.is_stale(count, self.cluster_config.drift_fraction)
    {
      debug!(k = existing.k, "reusing memoized cluster set");
      return Ok(existing);
    }

    info!(chunks = count, force, "computing concept clusters");
    let rows = self.store.list_chunks_with_vectors(None).await.map_err(EngineError::from)?;
    let items: Vec<(String, String, Vec<f32>)> = rows
      .into_iter()
      .map(|(chunk, vector)| (chunk.id, chunk.content, vector))
      .collect();

    let cluster_config = self.cluster_config.clone();
    let (set, assignments) =
      tokio::task::spawn_blocking(move || cluster_chunks(&items, &cluster_config))
        .await
        .map_err(|e| EngineError::storage(format!("clustering task failed: {e}")))?;

    self.store.set_concept_ids(&assignments).await.map_err(EngineError::from)?;
    set.save(&path).map_err(EngineError::from)?;
    self.usage.record("cluster", set.clusters.len());

    Ok(set)
  }

  /// Wipe the store and all sidecar state.
  pub async fn clear(&self) -> EngineResult<()> {
    let _guard = self.index_lock.try_lock().map_err(|_| EngineError::Busy)?;
    self.clear_state().await
  }

  async fn clear_state(&self) -> EngineResult<()> {
    self.store.clear().await.map_err(EngineError::from)?;

    let mut manifest = self.manifest.lock().await;
    *manifest = Manifest::new(self.backend.name(), self.backend.model(), self.backend.dimensions());
    manifest.save(&Config::manifest_path(&self.project_root)).map_err(EngineError::from)?;

    let clusters = Config::clusters_path(&self.project_root);
    if clusters.exists() {
      let _ = std::fs::remove_file(&clusters);
    }
    Ok(())
  }
}

/// Mutable bookkeeping threaded through embedding flushes.
struct FlushState {
  embedded: usize,
  chunks_created: usize,
  files_indexed: usize,
  total_chunks: usize,
  /// Chunks per file not yet written; a file is complete at zero
  remaining: Vec<usize>,
}

impl IndexCoordinator {
  /// Embed and upsert one buffered batch, then mark completed files in the
  /// manifest. Visibility is atomic per upsert call.
  async fn flush_batch<F>(
    &self,
    buffer: &mut Vec<(usize, Chunk)>,
    state: &mut FlushState,
    chunked: &[(WalkedFile, Vec<Chunk>)],
    on_progress: &F,
  ) -> EngineResult<()>
  where
    F: Fn(ProgressEvent) + Send + Sync,
  {
    if buffer.is_empty() {
      return Ok(());
    }
    let batch = std::mem::take(buffer);
    let texts: Vec<String> = batch
      .iter()
      .map(|(_, chunk)| truncate_for_embedding(&chunk.content))
      .collect();
    let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

    let vectors = match self.backend.embed_batch(&text_refs).await {
      Ok(vectors) => vectors,
      Err(e) if e.is_terminal() => {
        warn!(error = %e, "terminal embedding failure, aborting run");
        return Err(EngineError::from(e));
      }
      Err(e) => {
        // Non-terminal failure: skip this batch; its files keep their old
        // manifest entries and get retried on the next run
        warn!(error = %e, chunks = batch.len(), "embedding batch failed, skipping");
        return Ok(());
      }
    };
    if vectors.len() != batch.len() {
      return Err(EngineError::backend(format!(
        "embedding count mismatch: {} texts, {} vectors",
        batch.len(),
        vectors.len()
      )));
    }

    let rows: Vec<(Chunk, Vec<f32>)> = batch.iter().map(|(_, chunk)| chunk.clone()).zip(vectors).collect();
    self.store.upsert(&rows).await.map_err(EngineError::from)?;

    state.embedded += rows.len();
    state.chunks_created += rows.len();
    on_progress(ProgressEvent::Embedding {
      current: state.embedded,
      total: state.total_chunks,
    });

    // Mark files whose chunks are now all written
    let mut manifest = self.manifest.lock().await;
    for (file_idx, _) in &batch {
      state.remaining[*file_idx] -= 1;
      if state.remaining[*file_idx] == 0 {
        let (file, chunks) = &chunked[*file_idx];
        manifest.files.insert(
          file.relative_path.clone(),
          FileEntry {
            hash: file.content_hash.clone(),
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
          },
        );
        state.files_indexed += 1;
      }
    }
    manifest.touch();
    manifest
      .save(&Config::manifest_path(&self.project_root))
      .map_err(EngineError::from)?;
    Ok(())
  }
}

fn truncate_for_embedding(content: &str) -> String {
  if content.len() <= MAX_EMBED_CHARS {
    return content.to_string();
  }
  let mut end = MAX_EMBED_CHARS;
  while !content.is_char_boundary(end) {
    end -= 1;
  }
  content[..end].to_string()
}
