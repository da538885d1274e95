//! Command implementations: wire the factory, coordinator and planner
//! together and shape output.

use std::path::Path;

use anyhow::Context as _;
use index::{IndexCoordinator, IndexOptions, ProgressEvent};
use lodestone_core::{Config, Language};
use search::{QueryPlanner, SearchHit, SimilarQuery};
use tokio_util::sync::CancellationToken;

/// Everything a command needs: config, coordinator, planner.
pub struct Context {
  coordinator: IndexCoordinator,
  planner: QueryPlanner,
}

impl Context {
  pub async fn open(project_root: &Path) -> anyhow::Result<Self> {
    let config = Config::load_for_project(project_root).context("loading configuration")?;

    let selection = embedding::create_backend(&config.embedding)
      .await
      .context("selecting embedding backend")?;
    if let Some(info) = &selection.fallback {
      eprintln!(
        "note: backend '{}' unavailable ({}); using '{}'",
        info.original, info.reason, info.fallback
      );
    }

    let search_config = config.search.clone();
    let coordinator = IndexCoordinator::initialize(project_root, config, selection.backend, selection.fallback)
      .await
      .context("initializing index")?;

    let planner = QueryPlanner::new(
      coordinator.store_handle(),
      coordinator.backend(),
      search_config,
      project_root.to_path_buf(),
    );

    Ok(Self { coordinator, planner })
  }
}

pub async fn index(ctx: &Context, force: bool, repair: bool, json: bool) -> anyhow::Result<()> {
  let options = IndexOptions {
    force_reindex: force,
    auto_repair: repair,
    ..Default::default()
  };

  let outcome = ctx
    .coordinator
    .index_codebase(
      options,
      |event| match event {
        ProgressEvent::Scanning => eprintln!("scanning…"),
        ProgressEvent::Chunking { current, total } => {
          if current == total {
            eprintln!("chunked {total} files");
          }
        }
        ProgressEvent::Embedding { current, total } => eprintln!("embedded {current}/{total} chunks"),
        ProgressEvent::Writing => eprintln!("writing…"),
        ProgressEvent::Finalizing => eprintln!("finalizing…"),
      },
      CancellationToken::new(),
    )
    .await?;

  if json {
    println!(
      "{}",
      serde_json::json!({
        "filesIndexed": outcome.files_indexed,
        "chunksCreated": outcome.chunks_created,
        "incremental": outcome.incremental,
        "repaired": outcome.repaired,
        "cancelled": outcome.cancelled,
      })
    );
  } else {
    println!(
      "indexed {} files ({} chunks){}{}",
      outcome.files_indexed,
      outcome.chunks_created,
      if outcome.incremental { ", incremental" } else { "" },
      if outcome.repaired { ", repaired" } else { "" },
    );
  }
  Ok(())
}

pub async fn search(
  ctx: &Context,
  query: &str,
  limit: usize,
  path: Option<&str>,
  languages: &[String],
  json: bool,
) -> anyhow::Result<()> {
  let langs: Vec<Language> = languages.iter().map(|l| Language::parse(l)).collect();
  let language_filter = if langs.is_empty() { None } else { Some(langs.as_slice()) };

  let hits = ctx.planner.search(query, limit, path, language_filter).await?;
  print_hits(&hits, json)
}

pub async fn similar(ctx: &Context, query: SimilarQuery, json: bool) -> anyhow::Result<()> {
  let hits = ctx.planner.search_similar(query).await?;
  print_hits(&hits, json)
}

pub async fn concepts(ctx: &Context, force: bool, id: Option<i32>, json: bool) -> anyhow::Result<()> {
  let set = ctx.coordinator.concepts(force).await?;

  if let Some(concept_id) = id {
    let hits = ctx.planner.search_by_concept(concept_id, None, 20).await?;
    return print_hits(&hits, json);
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&set)?);
  } else {
    println!("{} concepts (quality {:.2}):", set.clusters.len(), set.quality);
    for cluster in &set.clusters {
      println!(
        "  [{}] {} — {} chunks; keywords: {}",
        cluster.id,
        cluster.label,
        cluster.size,
        cluster.keywords.join(", ")
      );
    }
  }
  Ok(())
}

pub async fn status(ctx: &Context, verify: bool, json: bool) -> anyhow::Result<()> {
  let status = ctx.coordinator.status(verify).await?;

  if json {
    println!(
      "{}",
      serde_json::json!({
        "files": status.files,
        "chunksInManifest": status.chunks_in_manifest,
        "chunksInStore": status.chunks_in_store,
        "backend": status.backend,
        "model": status.model,
        "dimension": status.dimension,
        "dimensionMismatch": status.dimension_mismatch,
        "corrupted": status.corrupted,
        "indexing": status.indexing,
      })
    );
  } else {
    println!(
      "{} files, {} chunks — backend {} ({}, {}d)",
      status.files, status.chunks_in_store, status.backend, status.model, status.dimension
    );
    if status.dimension_mismatch {
      println!("warning: stored index was built with different settings; reindex with --force");
    }
    if let Some(reason) = &status.corrupted {
      println!("warning: index corrupted: {reason}; reindex with --repair");
    }
    if let Some(info) = &status.fallback {
      println!("note: fell back from {} to {} ({})", info.original, info.fallback, info.reason);
    }
  }
  Ok(())
}

pub async fn clear(ctx: &Context) -> anyhow::Result<()> {
  ctx.coordinator.clear().await?;
  println!("index cleared");
  Ok(())
}

fn print_hits(hits: &[SearchHit], json: bool) -> anyhow::Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(hits)?);
    return Ok(());
  }

  if hits.is_empty() {
    println!("no results");
    return Ok(());
  }

  for hit in hits {
    let symbol = hit.symbol_name.as_deref().unwrap_or("-");
    println!(
      "{:.3}  {}:{}-{}  [{}] {}",
      hit.score, hit.filepath, hit.start_line, hit.end_line, hit.symbol_kind, symbol
    );
    for line in hit.content.lines().take(3) {
      println!("       {line}");
    }
  }
  Ok(())
}
