//! End-to-end coordinator tests over a scratch project directory with a
//! deterministic offline embedding backend.

mod common;

use std::{
  path::Path,
  sync::{Arc, Mutex},
};

use common::{DIM, StaticBackend};
use index::{IndexCoordinator, IndexOptions, ProgressEvent};
use lodestone_core::{Config, EngineError};
use tokio_util::sync::CancellationToken;

fn write(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

async fn coordinator(root: &Path) -> IndexCoordinator {
  IndexCoordinator::initialize(root, Config::default(), StaticBackend::new(), None)
    .await
    .unwrap()
}

async fn index(coordinator: &IndexCoordinator, options: IndexOptions) -> index::IndexOutcome {
  coordinator
    .index_codebase(options, |_| {}, CancellationToken::new())
    .await
    .unwrap()
}

#[tokio::test]
async fn test_full_index_pass() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export function alpha() {\n  return 1;\n}\n");
  write(temp.path(), "b.ts", "export function beta() {\n  return 2;\n}\n");

  let coordinator = coordinator(temp.path()).await;
  let outcome = index(&coordinator, IndexOptions::default()).await;

  assert_eq!(outcome.files_indexed, 2);
  assert!(outcome.chunks_created >= 2);
  assert!(!outcome.incremental);
  assert!(!outcome.repaired);

  // Manifest and store agree: every listed id exists, counts line up
  let status = coordinator.status(true).await.unwrap();
  assert_eq!(status.files, 2);
  assert_eq!(status.chunks_in_manifest, status.chunks_in_store);
  assert!(status.corrupted.is_none());
  assert_eq!(status.dimension, DIM);
}

#[tokio::test]
async fn test_row_invariants_after_index() {
  let temp = tempfile::TempDir::new().unwrap();
  write(
    temp.path(),
    "user.ts",
    "class User {\n  name: string;\n  constructor(n: string) {\n    this.name = n;\n  }\n}\n",
  );

  let coordinator = coordinator(temp.path()).await;
  index(&coordinator, IndexOptions::default()).await;

  let chunks = coordinator.store().list_chunks(None, None).await.unwrap();
  assert!(!chunks.is_empty());
  for chunk in &chunks {
    assert!(chunk.start_line >= 1);
    assert!(chunk.start_line <= chunk.end_line);
    assert_eq!(chunk.id, format!("{}:{}-{}", chunk.file_path, chunk.start_line, chunk.end_line));
    let embedding = coordinator.store().get_embedding(&chunk.id).await.unwrap().unwrap();
    assert_eq!(embedding.len(), DIM);
  }
}

#[tokio::test]
async fn test_incremental_reindex_replaces_only_changed_file() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export function alpha() {\n  return 1;\n}\n");
  write(temp.path(), "b.ts", "export function beta() {\n  return 2;\n}\n");

  let coordinator = coordinator(temp.path()).await;
  let first = index(&coordinator, IndexOptions::default()).await;
  assert!(first.chunks_created > 0);

  let b_ids_before: Vec<String> = coordinator
    .store()
    .list_chunks(Some("file_path = 'b.ts'"), None)
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.id)
    .collect();

  // Modify only a.ts
  write(
    temp.path(),
    "a.ts",
    "export function alpha() {\n  return 42;\n}\n\nexport function gamma() {\n  return 3;\n}\n",
  );

  let second = index(&coordinator, IndexOptions::default()).await;
  assert!(second.incremental);
  assert_eq!(second.files_indexed, 1, "only a.ts should be re-indexed");

  // b.ts chunk ids unchanged
  let b_ids_after: Vec<String> = coordinator
    .store()
    .list_chunks(Some("file_path = 'b.ts'"), None)
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.id)
    .collect();
  assert_eq!(b_ids_before, b_ids_after);

  // a.ts rows reflect the new content only
  let a_chunks = coordinator
    .store()
    .list_chunks(Some("file_path = 'a.ts'"), None)
    .await
    .unwrap();
  assert!(a_chunks.iter().any(|c| c.content.contains("gamma")));
  assert!(a_chunks.iter().all(|c| !c.content.contains("return 1;")));
}

#[tokio::test]
async fn test_unchanged_run_does_no_work() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export const value = 1;\n");

  let coordinator = coordinator(temp.path()).await;
  index(&coordinator, IndexOptions::default()).await;

  let second = index(&coordinator, IndexOptions::default()).await;
  assert!(second.incremental);
  assert_eq!(second.files_indexed, 0);
  assert_eq!(second.chunks_created, 0);
}

#[tokio::test]
async fn test_removed_file_chunks_deleted() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export const keep = 1;\n");
  write(temp.path(), "b.ts", "export const drop = 2;\n");

  let coordinator = coordinator(temp.path()).await;
  index(&coordinator, IndexOptions::default()).await;
  assert_eq!(coordinator.store().list_file_paths().await.unwrap().len(), 2);

  std::fs::remove_file(temp.path().join("b.ts")).unwrap();
  index(&coordinator, IndexOptions::default()).await;

  assert_eq!(coordinator.store().list_file_paths().await.unwrap(), vec!["a.ts".to_string()]);
  let status = coordinator.status(true).await.unwrap();
  assert_eq!(status.files, 1);
  assert!(status.corrupted.is_none());
}

#[tokio::test]
async fn test_force_reindex_rebuilds() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export const value = 1;\n");

  let coordinator = coordinator(temp.path()).await;
  let first = index(&coordinator, IndexOptions::default()).await;

  let forced = index(
    &coordinator,
    IndexOptions {
      force_reindex: true,
      ..Default::default()
    },
  )
  .await;

  assert!(!forced.incremental);
  assert_eq!(forced.chunks_created, first.chunks_created);
}

#[tokio::test]
async fn test_progress_phases_in_order() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export function one() {\n  return 1;\n}\n");
  write(temp.path(), "b.ts", "export function two() {\n  return 2;\n}\n");

  let coordinator = coordinator(temp.path()).await;
  let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&events);

  coordinator
    .index_codebase(
      IndexOptions::default(),
      move |event| sink.lock().unwrap().push(event),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  let events = events.lock().unwrap();
  assert_eq!(events[0], ProgressEvent::Scanning);

  // Phases appear in order
  let phase_rank = |e: &ProgressEvent| match e {
    ProgressEvent::Scanning => 0,
    ProgressEvent::Chunking { .. } => 1,
    ProgressEvent::Embedding { .. } => 2,
    ProgressEvent::Writing => 3,
    ProgressEvent::Finalizing => 4,
  };
  let ranks: Vec<_> = events.iter().map(phase_rank).collect();
  let mut sorted = ranks.clone();
  sorted.sort();
  assert_eq!(ranks, sorted, "phases out of order: {events:?}");

  // Within the embedding phase, current is monotone and ends at total
  let embedding: Vec<(usize, usize)> = events
    .iter()
    .filter_map(|e| match e {
      ProgressEvent::Embedding { current, total } => Some((*current, *total)),
      _ => None,
    })
    .collect();
  assert!(!embedding.is_empty());
  for pair in embedding.windows(2) {
    assert!(pair[0].0 <= pair[1].0);
  }
  let (last_current, last_total) = *embedding.last().unwrap();
  assert_eq!(last_current, last_total);
}

#[tokio::test]
async fn test_quota_failure_aborts_run() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export const value = 1;\n");

  let backend = StaticBackend::failing_with_quota("You have exceeded your current quota");
  let coordinator = IndexCoordinator::initialize(temp.path(), Config::default(), backend, None)
    .await
    .unwrap();

  let result = coordinator
    .index_codebase(IndexOptions::default(), |_| {}, CancellationToken::new())
    .await;

  assert!(matches!(result, Err(EngineError::Quota(_))), "got: {result:?}");
}

#[tokio::test]
async fn test_transient_failure_skips_batch_and_completes() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export const value = 1;\n");

  let backend = StaticBackend::failing_transient("connection reset by peer");
  let coordinator = IndexCoordinator::initialize(temp.path(), Config::default(), backend, None)
    .await
    .unwrap();

  // The run completes; the failed batch's file simply stays unindexed
  let outcome = coordinator
    .index_codebase(IndexOptions::default(), |_| {}, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(outcome.chunks_created, 0);
  assert_eq!(coordinator.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_index_is_busy() {
  let temp = tempfile::TempDir::new().unwrap();
  for i in 0..20 {
    write(
      temp.path(),
      &format!("f{i}.ts"),
      &format!("export function f{i}() {{\n  return {i};\n}}\n"),
    );
  }

  let coordinator = Arc::new(coordinator(temp.path()).await);

  let first = {
    let coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
      coordinator
        .index_codebase(IndexOptions::default(), |_| {}, CancellationToken::new())
        .await
    })
  };

  // Give the first run a moment to take the lock, then collide with it
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  let second = coordinator
    .index_codebase(IndexOptions::default(), |_| {}, CancellationToken::new())
    .await;

  let first = first.await.unwrap();
  assert!(first.is_ok());
  match second {
    Err(EngineError::Busy) => {}
    // The first run may already have finished on a fast machine
    Ok(outcome) => assert!(outcome.incremental),
    Err(other) => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn test_corruption_detected_and_repaired() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "a.ts", "export function alpha() {\n  return 1;\n}\n");
  write(temp.path(), "b.ts", "export function beta() {\n  return 2;\n}\n");

  let coordinator = coordinator(temp.path()).await;
  index(&coordinator, IndexOptions::default()).await;

  // Corrupt: wipe the store behind the manifest's back
  coordinator.store().clear().await.unwrap();

  let status = coordinator.status(true).await.unwrap();
  assert!(status.corrupted.is_some(), "divergence must be detected");

  // Next run with auto_repair rebuilds cleanly
  let outcome = index(
    &coordinator,
    IndexOptions {
      auto_repair: true,
      ..Default::default()
    },
  )
  .await;
  assert!(outcome.repaired);

  let status = coordinator.status(true).await.unwrap();
  assert!(status.corrupted.is_none());
  assert_eq!(status.chunks_in_manifest, status.chunks_in_store);
}

#[tokio::test]
async fn test_cancellation_keeps_partial_progress() {
  let temp = tempfile::TempDir::new().unwrap();
  for i in 0..10 {
    write(
      temp.path(),
      &format!("f{i}.ts"),
      &format!("export function f{i}() {{\n  return {i};\n}}\n"),
    );
  }

  let coordinator = coordinator(temp.path()).await;
  let cancel = CancellationToken::new();
  cancel.cancel(); // Cancel before the run even starts

  let outcome = coordinator
    .index_codebase(IndexOptions::default(), |_| {}, cancel)
    .await
    .unwrap();

  assert!(outcome.cancelled);
  // Whatever was written stays consistent
  let status = coordinator.status(true).await.unwrap();
  assert_eq!(status.chunks_in_manifest, status.chunks_in_store);
}

#[tokio::test]
async fn test_concepts_cluster_and_memoize() {
  let temp = tempfile::TempDir::new().unwrap();
  for i in 0..12 {
    write(
      temp.path(),
      &format!("auth{i}.ts"),
      &format!("export function login{i}(user) {{\n  return session.token(user, {i});\n}}\n"),
    );
    write(
      temp.path(),
      &format!("render{i}.ts"),
      &format!("export function draw{i}(canvas) {{\n  return canvas.pixel({i});\n}}\n"),
    );
  }

  let coordinator = coordinator(temp.path()).await;
  index(&coordinator, IndexOptions::default()).await;

  let set = coordinator.concepts(false).await.unwrap();
  assert!(set.k >= 2);
  assert_eq!(set.clusters.iter().map(|c| c.size).sum::<usize>(), set.computed_at_chunk_count);
  for cluster in &set.clusters {
    assert!(!cluster.label.is_empty());
    assert!(cluster.keywords.len() <= 8);
    assert!(cluster.representatives.len() <= 5);
  }

  // Concept ids written back to the store, dense 0..k
  let chunks = coordinator.store().list_chunks(None, None).await.unwrap();
  for chunk in &chunks {
    let concept = chunk.concept_id.expect("every chunk gets a concept");
    assert!((concept as usize) < set.k);
  }

  // Memoized: second call returns the same set without recomputation
  let again = coordinator.concepts(false).await.unwrap();
  assert_eq!(again.k, set.k);
  assert_eq!(again.quality, set.quality);

  // clusters.json exists in the sidecar layout
  assert!(Config::clusters_path(temp.path()).exists());
}

#[tokio::test]
async fn test_concepts_before_index_not_indexed() {
  let temp = tempfile::TempDir::new().unwrap();
  let coordinator = coordinator(temp.path()).await;
  let result = coordinator.concepts(false).await;
  assert!(matches!(result, Err(EngineError::NotIndexed)));
}

#[tokio::test]
async fn test_parse_failure_is_per_file_recoverable() {
  let temp = tempfile::TempDir::new().unwrap();
  write(temp.path(), "good.ts", "export function good() {\n  return 1;\n}\n");
  // Deeply malformed file still indexes via the line-window fallback
  write(temp.path(), "bad.ts", "}}}{{{ ((( not typescript at all\n\u{0}\u{1}\n");

  let coordinator = coordinator(temp.path()).await;
  let outcome = index(&coordinator, IndexOptions::default()).await;
  assert_eq!(outcome.files_indexed, 2);

  let good = coordinator
    .store()
    .list_chunks(Some("file_path = 'good.ts'"), None)
    .await
    .unwrap();
  assert!(!good.is_empty());
}
