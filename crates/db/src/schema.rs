use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

/// Name of the single table holding chunk rows.
pub const CHUNKS_TABLE: &str = "chunks";

/// Schema for the chunks table.
///
/// The vector column is a fixed-size list whose width is the embedding
/// dimension chosen at table creation; it never changes for the life of
/// the table.
pub fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("file_path", DataType::Utf8, false),
    Field::new("content", DataType::Utf8, false),
    Field::new("start_line", DataType::UInt32, false),
    Field::new("end_line", DataType::UInt32, false),
    Field::new("language", DataType::Utf8, false),
    Field::new("symbol_name", DataType::Utf8, true),
    Field::new("symbol_kind", DataType::Utf8, true),
    Field::new("content_hash", DataType::Utf8, false),
    Field::new("concept_id", DataType::Int32, true), // Assigned after clustering
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      false,
    ),
  ]))
}
