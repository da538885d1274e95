//! Sliding line-window chunker for languages without AST support.

use lodestone_core::{Chunk, ChunkId, ChunkKind, Language};

use super::ChunkerConfig;

/// Chunk a file into fixed-size overlapping line windows.
///
/// Windows that contain only whitespace are skipped.
pub fn chunk_windows(
  source: &str,
  relative_path: &str,
  language: Language,
  file_hash: &str,
  config: &ChunkerConfig,
) -> Vec<Chunk> {
  let lines: Vec<&str> = source.lines().collect();
  if lines.is_empty() {
    return Vec::new();
  }

  let window = config.window_lines.max(1);
  let step = window.saturating_sub(config.window_overlap).max(1);

  let mut chunks = Vec::new();
  let mut start = 0usize;
  while start < lines.len() {
    let end = (start + window).min(lines.len());
    let slice = &lines[start..end];

    if slice.iter().any(|line| !line.trim().is_empty()) {
      let start_line = (start + 1) as u32;
      let end_line = end as u32;
      chunks.push(Chunk {
        id: ChunkId::new(relative_path, start_line, end_line).to_string(),
        file_path: relative_path.to_string(),
        content: slice.join("\n"),
        start_line,
        end_line,
        language,
        symbol_name: None,
        kind: ChunkKind::Other,
        content_hash: file_hash.to_string(),
        concept_id: None,
      });
    }

    if end == lines.len() {
      break;
    }
    start += step;
  }

  chunks
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(window: usize, overlap: usize) -> ChunkerConfig {
    ChunkerConfig {
      window_lines: window,
      window_overlap: overlap,
      ..Default::default()
    }
  }

  #[test]
  fn test_small_file_single_window() {
    let chunks = chunk_windows("a\nb\nc", "f.md", Language::Markdown, "h", &config(100, 20));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 3);
    assert_eq!(chunks[0].content, "a\nb\nc");
  }

  #[test]
  fn test_windows_overlap() {
    let source = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let chunks = chunk_windows(&source, "f.md", Language::Markdown, "h", &config(4, 2));

    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 4);
    assert_eq!(chunks[1].start_line, 3);
    assert_eq!(chunks[1].end_line, 6);
    // Full coverage up to the last line
    assert_eq!(chunks.last().unwrap().end_line, 10);
  }

  #[test]
  fn test_empty_windows_skipped() {
    let source = "text\n\n\n\n\n\n\n\n\n\nmore text";
    let chunks = chunk_windows(source, "f.md", Language::Markdown, "h", &config(4, 0));
    // The middle all-blank window must not be emitted
    assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
  }

  #[test]
  fn test_zero_overlap_never_stalls() {
    let source = (1..=9).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let chunks = chunk_windows(&source, "f.md", Language::Markdown, "h", &config(3, 3));
    // Degenerate overlap == window still advances by one line
    assert!(!chunks.is_empty());
    assert!(chunks.len() <= 9);
  }
}
