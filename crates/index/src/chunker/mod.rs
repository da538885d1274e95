//! Chunking: AST-aware for the TypeScript/JavaScript family, sliding line
//! window for everything else.
//!
//! Chunk quality dominates retrieval quality, so the AST path goes to some
//! length to cut at declaration boundaries, merge imports, and split large
//! classes member-by-member. The window path is deliberately dumb.

mod ast;
mod window;

use lodestone_core::{Chunk, ChunkId, Language};
use tracing::warn;

/// Configuration for the chunker
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
  /// Lines per window for non-AST languages
  pub window_lines: usize,
  /// Overlap between consecutive windows
  pub window_overlap: usize,
  /// Hard ceiling on chunk size; larger chunks are split
  pub max_chunk_lines: usize,
  /// A trailing split part shorter than this merges into its predecessor
  pub min_chunk_lines: usize,
}

impl Default for ChunkerConfig {
  fn default() -> Self {
    Self {
      window_lines: 100,
      window_overlap: 20,
      max_chunk_lines: 150,
      min_chunk_lines: 10,
    }
  }
}

impl ChunkerConfig {
  pub fn from_config(config: &lodestone_core::Config) -> Self {
    Self {
      window_lines: config.chunking.max_lines,
      window_overlap: config.chunking.overlap,
      ..Default::default()
    }
  }
}

/// Source-code chunker
pub struct Chunker {
  config: ChunkerConfig,
}

impl Default for Chunker {
  fn default() -> Self {
    Self::new(ChunkerConfig::default())
  }
}

impl Chunker {
  pub fn new(config: ChunkerConfig) -> Self {
    Self { config }
  }

  /// Chunk a file into retrieval units.
  ///
  /// AST languages that fail to parse fall back to the line window, so
  /// this never fails outright; the parse failure is logged per file.
  pub fn chunk(&self, source: &str, relative_path: &str, language: Language, file_hash: &str) -> Vec<Chunk> {
    if source.trim().is_empty() {
      return Vec::new();
    }

    let chunks = if language.has_ast_support() {
      match ast::chunk_ast(source, relative_path, language, file_hash, &self.config) {
        Ok(chunks) => chunks,
        Err(e) => {
          warn!(file = %relative_path, error = %e, "AST parse failed, falling back to line windows");
          window::chunk_windows(source, relative_path, language, file_hash, &self.config)
        }
      }
    } else {
      window::chunk_windows(source, relative_path, language, file_hash, &self.config)
    };

    split_oversized(chunks, &self.config)
  }
}

/// Split any chunk longer than `max_chunk_lines` into near-equal parts.
///
/// A trailing part shorter than `min_chunk_lines` is merged into the
/// previous part rather than emitted alone. Parts keep the original kind
/// and get a `" (part N)"` name suffix.
fn split_oversized(chunks: Vec<Chunk>, config: &ChunkerConfig) -> Vec<Chunk> {
  let mut out = Vec::with_capacity(chunks.len());

  for chunk in chunks {
    let total = chunk.line_count() as usize;
    if total <= config.max_chunk_lines {
      out.push(chunk);
      continue;
    }

    let lines: Vec<&str> = chunk.content.lines().collect();
    let part_count = total.div_ceil(config.max_chunk_lines);
    let part_size = total.div_ceil(part_count);

    let mut bounds: Vec<(usize, usize)> = Vec::with_capacity(part_count);
    let mut offset = 0;
    while offset < lines.len() {
      let end = (offset + part_size).min(lines.len());
      bounds.push((offset, end));
      offset = end;
    }

    // Merge a short tail into its predecessor
    if bounds.len() >= 2 {
      let (last_start, last_end) = bounds[bounds.len() - 1];
      if last_end - last_start < config.min_chunk_lines {
        bounds.pop();
        let idx = bounds.len() - 1;
        bounds[idx].1 = last_end;
      }
    }

    for (n, (part_start, part_end)) in bounds.iter().enumerate() {
      let start_line = chunk.start_line + *part_start as u32;
      let end_line = chunk.start_line + (*part_end as u32) - 1;
      let name = chunk
        .symbol_name
        .as_deref()
        .map(|base| format!("{base} (part {})", n + 1));
      out.push(Chunk {
        id: ChunkId::new(&chunk.file_path, start_line, end_line).to_string(),
        file_path: chunk.file_path.clone(),
        content: lines[*part_start..*part_end].join("\n"),
        start_line,
        end_line,
        language: chunk.language,
        symbol_name: name,
        kind: chunk.kind,
        content_hash: chunk.content_hash.clone(),
        concept_id: None,
      });
    }
  }

  out
}
