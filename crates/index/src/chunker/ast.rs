//! Tree-sitter AST chunker for the TypeScript/JavaScript family.
//!
//! Grammar selection mirrors the upstream grammars:
//! - JavaScript/JSX: tree-sitter-javascript (includes JSX)
//! - TypeScript: tree-sitter-typescript (no JSX)
//! - TSX: tree-sitter-typescript TSX grammar

use lodestone_core::{Chunk, ChunkId, ChunkKind, Language};
use tree_sitter::{Node, Parser};

use super::ChunkerConfig;
use crate::IndexError;

pub fn chunk_ast(
  source: &str,
  relative_path: &str,
  language: Language,
  file_hash: &str,
  config: &ChunkerConfig,
) -> Result<Vec<Chunk>, IndexError> {
  let grammar: tree_sitter::Language = match language {
    Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
    // The JavaScript grammar includes JSX support
    Language::JavaScript | Language::Jsx => tree_sitter_javascript::LANGUAGE.into(),
    other => {
      return Err(IndexError::Parse {
        file: relative_path.to_string(),
        message: format!("no AST grammar for language {}", other.as_str()),
      });
    }
  };

  let mut parser = Parser::new();
  parser.set_language(&grammar).map_err(|e| IndexError::Parse {
    file: relative_path.to_string(),
    message: format!("loading grammar: {e}"),
  })?;

  let tree = parser.parse(source, None).ok_or_else(|| IndexError::Parse {
    file: relative_path.to_string(),
    message: "parser produced no tree".to_string(),
  })?;

  let root = tree.root_node();
  if root.kind() != "program" {
    return Err(IndexError::Parse {
      file: relative_path.to_string(),
      message: format!("unexpected root node {}", root.kind()),
    });
  }

  let lines: Vec<&str> = source.lines().collect();
  let emitter = Emitter {
    relative_path,
    language,
    file_hash,
    lines: &lines,
    config,
  };

  let mut import_nodes: Vec<(u32, u32)> = Vec::new();
  let mut chunks: Vec<Chunk> = Vec::new();
  // Start line of contiguous leading comments not yet attached to a node;
  // stands in for the "full start" of the following declaration.
  let mut pending_trivia: Option<u32> = None;

  let mut cursor = root.walk();
  for child in root.children(&mut cursor) {
    match child.kind() {
      "comment" => {
        let (start, _) = line_range(child);
        pending_trivia.get_or_insert(start);
      }
      "hash_bang_line" | "empty_statement" => {}
      "import_statement" => {
        let (start, end) = line_range(child);
        let start = pending_trivia.take().unwrap_or(start);
        import_nodes.push((start, end));
      }
      "export_statement" if child.child_by_field_name("source").is_some() => {
        // Re-export: `export { x } from './mod'` joins the imports chunk
        let (start, end) = line_range(child);
        let start = pending_trivia.take().unwrap_or(start);
        import_nodes.push((start, end));
      }
      _ => {
        let (node_start, end) = line_range(child);
        let start = pending_trivia.take().unwrap_or(node_start);
        emitter.emit_declaration(child, start, end, source, &mut chunks);
      }
    }
  }

  // Imports chunk goes first regardless of where imports sat in the file
  if !import_nodes.is_empty() {
    let start = import_nodes.iter().map(|(s, _)| *s).min().unwrap_or(1);
    let end = import_nodes.iter().map(|(_, e)| *e).max().unwrap_or(start);
    let content = import_nodes
      .iter()
      .map(|(s, e)| emitter.slice(*s, *e))
      .collect::<Vec<_>>()
      .join("\n");
    let imports_chunk = Chunk {
      id: ChunkId::new(relative_path, start, end).to_string(),
      file_path: relative_path.to_string(),
      content,
      start_line: start,
      end_line: end,
      language,
      symbol_name: Some("imports".to_string()),
      kind: ChunkKind::Import,
      content_hash: file_hash.to_string(),
      concept_id: None,
    };
    chunks.insert(0, imports_chunk);
  }

  Ok(chunks)
}

struct Emitter<'a> {
  relative_path: &'a str,
  language: Language,
  file_hash: &'a str,
  lines: &'a [&'a str],
  config: &'a ChunkerConfig,
}

impl Emitter<'_> {
  fn slice(&self, start_line: u32, end_line: u32) -> String {
    let start = (start_line as usize - 1).min(self.lines.len());
    let end = (end_line as usize).min(self.lines.len());
    self.lines[start..end].join("\n")
  }

  fn make_chunk(&self, start: u32, end: u32, kind: ChunkKind, name: Option<String>) -> Chunk {
    Chunk {
      id: ChunkId::new(self.relative_path, start, end).to_string(),
      file_path: self.relative_path.to_string(),
      content: self.slice(start, end),
      start_line: start,
      end_line: end,
      language: self.language,
      symbol_name: name,
      kind,
      content_hash: self.file_hash.to_string(),
      concept_id: None,
    }
  }

  /// Emit chunks for one top-level declaration (possibly export-wrapped).
  fn emit_declaration(&self, node: Node<'_>, start: u32, end: u32, source: &str, out: &mut Vec<Chunk>) {
    // `export function f() {}` classifies by the wrapped declaration but
    // spans the whole export statement
    let decl = if node.kind() == "export_statement" {
      node.child_by_field_name("declaration").unwrap_or(node)
    } else {
      node
    };

    match decl.kind() {
      "class_declaration" | "abstract_class_declaration" => {
        self.emit_class(decl, start, end, source, out);
      }
      "function_declaration" | "generator_function_declaration" => {
        out.push(self.make_chunk(start, end, ChunkKind::Function, node_name(decl, source)));
      }
      "interface_declaration" => {
        out.push(self.make_chunk(start, end, ChunkKind::Interface, node_name(decl, source)));
      }
      "type_alias_declaration" | "enum_declaration" => {
        out.push(self.make_chunk(start, end, ChunkKind::Type, node_name(decl, source)));
      }
      "lexical_declaration" | "variable_declaration" => {
        out.push(self.make_chunk(start, end, ChunkKind::Variable, declarator_names(decl, source)));
      }
      _ => {
        // Bare statement
        out.push(self.make_chunk(start, end, ChunkKind::Other, None));
      }
    }
  }

  /// One chunk for a small class; header + per-member chunks for a large
  /// one. Methods become `Class.member` method chunks, properties become
  /// `Class.member` variable chunks.
  fn emit_class(&self, class_node: Node<'_>, start: u32, end: u32, source: &str, out: &mut Vec<Chunk>) {
    let class_name = node_name(class_node, source).unwrap_or_else(|| "anonymous".to_string());
    let span = (end - start + 1) as usize;

    if span <= self.config.max_chunk_lines {
      out.push(self.make_chunk(start, end, ChunkKind::Class, Some(class_name)));
      return;
    }

    let Some(body) = class_node.child_by_field_name("body") else {
      out.push(self.make_chunk(start, end, ChunkKind::Class, Some(class_name)));
      return;
    };

    // Collect members with leading comments attached
    let mut members: Vec<(Node<'_>, u32, u32)> = Vec::new();
    let mut pending_trivia: Option<u32> = None;
    let mut cursor = body.walk();
    for member in body.children(&mut cursor) {
      match member.kind() {
        "comment" => {
          let (member_start, _) = line_range(member);
          pending_trivia.get_or_insert(member_start);
        }
        "{" | "}" | ";" => {}
        _ => {
          let (member_start, member_end) = line_range(member);
          let member_start = pending_trivia.take().unwrap_or(member_start);
          members.push((member, member_start, member_end));
        }
      }
    }

    if members.is_empty() {
      out.push(self.make_chunk(start, end, ChunkKind::Class, Some(class_name)));
      return;
    }

    // Header: class start up to the first member
    let first_member_start = members[0].1;
    let header_end = first_member_start.saturating_sub(1).max(start);
    out.push(self.make_chunk(start, header_end, ChunkKind::Class, Some(format!("{class_name} (header)"))));

    for (member, member_start, member_end) in members {
      let member_name = node_name(member, source);
      let qualified = member_name.map(|n| format!("{class_name}.{n}"));
      let kind = match member.kind() {
        "method_definition" | "abstract_method_signature" | "method_signature" => ChunkKind::Method,
        "public_field_definition" | "field_definition" | "property_signature" => ChunkKind::Variable,
        _ => ChunkKind::Other,
      };
      out.push(self.make_chunk(member_start, member_end, kind, qualified));
    }
  }
}

/// Inclusive 1-based line range of a node.
fn line_range(node: Node<'_>) -> (u32, u32) {
  let start = node.start_position().row as u32 + 1;
  let end = node.end_position().row as u32 + 1;
  (start, end.max(start))
}

/// Text of a node's `name` field, when present.
fn node_name(node: Node<'_>, source: &str) -> Option<String> {
  node
    .child_by_field_name("name")
    .and_then(|n| n.utf8_text(source.as_bytes()).ok())
    .map(|s| s.to_string())
}

/// Comma-joined declarator names of a variable statement.
fn declarator_names(node: Node<'_>, source: &str) -> Option<String> {
  let mut names = Vec::new();
  let mut cursor = node.walk();
  for child in node.children(&mut cursor) {
    if child.kind() == "variable_declarator"
      && let Some(name) = node_name(child, source)
    {
      names.push(name);
    }
  }
  if names.is_empty() { None } else { Some(names.join(", ")) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn chunk(source: &str, language: Language) -> Vec<Chunk> {
    chunk_ast(source, "test.ts", language, "hash", &ChunkerConfig::default()).unwrap()
  }

  #[test]
  fn test_function_chunk() {
    let chunks = chunk("function greet(name: string) {\n  return `hi ${name}`;\n}\n", Language::TypeScript);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Function);
    assert_eq!(chunks[0].symbol_name.as_deref(), Some("greet"));
  }

  #[test]
  fn test_exported_declarations_keep_names() {
    let source =
      "export function f() {}\nexport class C {}\nexport interface I { x: number }\nexport type T = string;\n";
    let chunks = chunk(source, Language::TypeScript);
    let names: Vec<_> = chunks.iter().filter_map(|c| c.symbol_name.as_deref()).collect();
    assert!(names.contains(&"f"), "names: {names:?}");
    assert!(names.contains(&"C"), "names: {names:?}");
    assert!(names.contains(&"I"), "names: {names:?}");
    assert!(names.contains(&"T"), "names: {names:?}");

    let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();
    assert!(kinds.contains(&ChunkKind::Function));
    assert!(kinds.contains(&ChunkKind::Class));
    assert!(kinds.contains(&ChunkKind::Interface));
    assert!(kinds.contains(&ChunkKind::Type));
  }

  #[test]
  fn test_reexport_joins_imports() {
    let source = "import { a } from './a';\nexport { b } from './b';\n\nexport const x = 1;\n";
    let chunks = chunk(source, Language::TypeScript);
    let imports = &chunks[0];
    assert_eq!(imports.kind, ChunkKind::Import);
    assert!(imports.content.contains("'./a'"));
    assert!(imports.content.contains("'./b'"));
    // The plain export stays its own variable chunk
    assert!(chunks.iter().any(|c| c.kind == ChunkKind::Variable));
  }

  #[test]
  fn test_multi_declarator_names_joined() {
    let chunks = chunk("const a = 1, b = 2, c = 3;\n", Language::TypeScript);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].symbol_name.as_deref(), Some("a, b, c"));
    assert_eq!(chunks[0].kind, ChunkKind::Variable);
  }

  #[test]
  fn test_leading_comment_attaches_to_declaration() {
    let source = "// adds two numbers\n// carefully\nfunction add(a: number, b: number) {\n  return a + b;\n}\n";
    let chunks = chunk(source, Language::TypeScript);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert!(chunks[0].content.contains("adds two numbers"));
  }

  #[test]
  fn test_decorated_class_includes_decorator() {
    let source = "@Injectable()\nclass Service {\n  run() {}\n}\n";
    let chunks = chunk(source, Language::TypeScript);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Class);
    assert!(chunks[0].content.contains("@Injectable"));
  }

  #[test]
  fn test_enum_maps_to_type_kind() {
    let chunks = chunk("enum Color { Red, Green, Blue }\n", Language::TypeScript);
    assert_eq!(chunks[0].kind, ChunkKind::Type);
    assert_eq!(chunks[0].symbol_name.as_deref(), Some("Color"));
  }

  #[test]
  fn test_bare_statement_is_other() {
    let chunks = chunk("console.log('boot');\n", Language::TypeScript);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Other);
    assert_eq!(chunks[0].symbol_name, None);
  }

  #[test]
  fn test_tsx_component() {
    let source = "export function App() {\n  return <div>hello</div>;\n}\n";
    let chunks = chunk_ast(source, "app.tsx", Language::Tsx, "hash", &ChunkerConfig::default()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Function);
    assert_eq!(chunks[0].symbol_name.as_deref(), Some("App"));
  }

  #[test]
  fn test_jsx_via_javascript_grammar() {
    let source = "const App = () => <span>hi</span>;\n";
    let chunks = chunk_ast(source, "app.jsx", Language::Jsx, "hash", &ChunkerConfig::default()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].symbol_name.as_deref(), Some("App"));
  }

  #[test]
  fn test_large_class_members_are_qualified() {
    let mut source = String::from("class Repo {\n  private db: Db;\n");
    for i in 0..60 {
      source.push_str(&format!("  find{i}(id) {{\n    return this.db.get({i});\n  }}\n"));
    }
    source.push('}');

    let chunks = chunk(&source, Language::TypeScript);

    let header = &chunks[0];
    assert_eq!(header.kind, ChunkKind::Class);
    assert_eq!(header.symbol_name.as_deref(), Some("Repo (header)"));
    assert_eq!(header.start_line, 1);

    let prop = chunks
      .iter()
      .find(|c| c.symbol_name.as_deref() == Some("Repo.db"))
      .expect("property chunk");
    assert_eq!(prop.kind, ChunkKind::Variable);

    let method = chunks
      .iter()
      .find(|c| c.symbol_name.as_deref() == Some("Repo.find0"))
      .expect("method chunk");
    assert_eq!(method.kind, ChunkKind::Method);
  }

  #[test]
  fn test_chunks_cover_distinct_ranges() {
    let source = "import x from 'x';\n\nfunction a() {}\n\nfunction b() {}\n";
    let chunks = chunk(source, Language::TypeScript);
    for window in chunks.windows(2) {
      // Imports chunk is first; subsequent chunks appear in source order
      if window[0].kind != ChunkKind::Import {
        assert!(window[0].start_line <= window[1].start_line);
      }
    }
  }
}
