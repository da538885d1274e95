//! Chunk domain model shared by the chunker, store and query layers.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Language tag attached to every chunk.
///
/// The AST chunker only understands the TypeScript/JavaScript family; all
/// other languages are carried as tags for filtering and fall back to the
/// line-window chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  TypeScript,
  Tsx,
  JavaScript,
  Jsx,
  Rust,
  Python,
  Go,
  Java,
  C,
  Cpp,
  Ruby,
  Shell,
  Json,
  Yaml,
  Toml,
  Markdown,
  Other,
}

impl Language {
  /// Map a file extension (without the dot) to a language tag.
  pub fn from_extension(ext: &str) -> Option<Self> {
    let lang = match ext {
      "ts" | "mts" | "cts" => Language::TypeScript,
      "tsx" => Language::Tsx,
      "js" | "mjs" | "cjs" => Language::JavaScript,
      "jsx" => Language::Jsx,
      "rs" => Language::Rust,
      "py" | "pyi" => Language::Python,
      "go" => Language::Go,
      "java" => Language::Java,
      "c" | "h" => Language::C,
      "cc" | "cpp" | "cxx" | "hpp" => Language::Cpp,
      "rb" => Language::Ruby,
      "sh" | "bash" | "zsh" => Language::Shell,
      "json" => Language::Json,
      "yaml" | "yml" => Language::Yaml,
      "toml" => Language::Toml,
      "md" | "markdown" => Language::Markdown,
      _ => return None,
    };
    Some(lang)
  }

  /// Whether the AST chunker can parse this language.
  pub fn has_ast_support(&self) -> bool {
    matches!(
      self,
      Language::TypeScript | Language::Tsx | Language::JavaScript | Language::Jsx
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Language::TypeScript => "typescript",
      Language::Tsx => "tsx",
      Language::JavaScript => "javascript",
      Language::Jsx => "jsx",
      Language::Rust => "rust",
      Language::Python => "python",
      Language::Go => "go",
      Language::Java => "java",
      Language::C => "c",
      Language::Cpp => "cpp",
      Language::Ruby => "ruby",
      Language::Shell => "shell",
      Language::Json => "json",
      Language::Yaml => "yaml",
      Language::Toml => "toml",
      Language::Markdown => "markdown",
      Language::Other => "other",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "typescript" => Language::TypeScript,
      "tsx" => Language::Tsx,
      "javascript" => Language::JavaScript,
      "jsx" => Language::Jsx,
      "rust" => Language::Rust,
      "python" => Language::Python,
      "go" => Language::Go,
      "java" => Language::Java,
      "c" => Language::C,
      "cpp" => Language::Cpp,
      "ruby" => Language::Ruby,
      "shell" => Language::Shell,
      "json" => Language::Json,
      "yaml" => Language::Yaml,
      "toml" => Language::Toml,
      "markdown" => Language::Markdown,
      _ => Language::Other,
    }
  }
}

/// The closed set of chunk kinds produced by the chunkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
  Function,
  Class,
  Method,
  Interface,
  Type,
  Variable,
  Import,
  Other,
}

impl ChunkKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChunkKind::Function => "function",
      ChunkKind::Class => "class",
      ChunkKind::Method => "method",
      ChunkKind::Interface => "interface",
      ChunkKind::Type => "type",
      ChunkKind::Variable => "variable",
      ChunkKind::Import => "import",
      ChunkKind::Other => "other",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "function" => ChunkKind::Function,
      "class" => ChunkKind::Class,
      "method" => ChunkKind::Method,
      "interface" => ChunkKind::Interface,
      "type" => ChunkKind::Type,
      "variable" => ChunkKind::Variable,
      "import" => ChunkKind::Import,
      _ => ChunkKind::Other,
    }
  }
}

/// Stable chunk identity: `{relative-path}:{start-line}-{end-line}`.
///
/// The id is the primary key in the vector table and the unit of
/// replacement during incremental indexing. Line numbers are inclusive and
/// 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
  pub file_path: String,
  pub start_line: u32,
  pub end_line: u32,
}

impl ChunkId {
  pub fn new(file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
    Self {
      file_path: file_path.into(),
      start_line,
      end_line,
    }
  }

  /// Parse an id string back into its (path, start, end) parts.
  ///
  /// Paths may themselves contain `:` on some platforms, so the split is
  /// anchored at the last colon.
  pub fn parse(id: &str) -> Result<Self, EngineError> {
    let (path, range) = id
      .rsplit_once(':')
      .ok_or_else(|| EngineError::validation(format!("malformed chunk id: {id}")))?;
    let (start, end) = range
      .split_once('-')
      .ok_or_else(|| EngineError::validation(format!("malformed chunk id range: {id}")))?;
    let start_line: u32 = start
      .parse()
      .map_err(|_| EngineError::validation(format!("bad start line in chunk id: {id}")))?;
    let end_line: u32 = end
      .parse()
      .map_err(|_| EngineError::validation(format!("bad end line in chunk id: {id}")))?;
    if start_line == 0 || start_line > end_line {
      return Err(EngineError::validation(format!("inverted line range in chunk id: {id}")));
    }
    Ok(Self {
      file_path: path.to_string(),
      start_line,
      end_line,
    })
  }
}

impl std::fmt::Display for ChunkId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}-{}", self.file_path, self.start_line, self.end_line)
  }
}

/// A contiguous span of a source file together with its metadata.
///
/// The embedding vector travels alongside the chunk (as `(Chunk, Vec<f32>)`
/// pairs) rather than inside it; only the store row couples the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
  /// `{relative-path}:{start}-{end}`, unique within one index
  pub id: String,
  /// Path relative to the project root
  pub file_path: String,
  /// Exact text of the line range, joined by newlines
  pub content: String,
  /// Inclusive, 1-based
  pub start_line: u32,
  /// Inclusive, 1-based
  pub end_line: u32,
  pub language: Language,
  /// Primary symbol name, e.g. `User` or `User.save`
  pub symbol_name: Option<String>,
  pub kind: ChunkKind,
  /// Hash of the owning file's content at indexing time
  pub content_hash: String,
  /// Dense cluster id assigned after concept clustering
  pub concept_id: Option<i32>,
}

impl Chunk {
  pub fn line_count(&self) -> u32 {
    self.end_line - self.start_line + 1
  }

  pub fn chunk_id(&self) -> Result<ChunkId, EngineError> {
    ChunkId::parse(&self.id)
  }
}
