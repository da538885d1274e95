// Chunk row operations on the vector table.

use std::{collections::BTreeMap, sync::Arc};

use arrow_array::{
  Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array,
};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use lodestone_core::{Chunk, ChunkKind, Language};
use tracing::{debug, trace};

use crate::{
  connection::{DbError, Result, VectorStore},
  filter::escape_sql,
  schema::chunks_schema,
};

/// Rows per delete+insert call during upserts.
const UPSERT_BATCH: usize = 256;

impl VectorStore {
  /// Insert or replace chunk rows by id.
  ///
  /// Existing rows with the same ids are deleted first, then the batch is
  /// inserted, so a reader sees either the old or the new row for any id,
  /// never both.
  #[tracing::instrument(level = "trace", skip(self, rows), fields(batch_size = rows.len()))]
  pub async fn upsert(&self, rows: &[(Chunk, Vec<f32>)]) -> Result<()> {
    if rows.is_empty() {
      return Ok(());
    }

    for (chunk, vector) in rows {
      if vector.len() != self.dimension() {
        return Err(DbError::DimensionMismatch {
          expected: self.dimension(),
          got: vector.len(),
        });
      }
      if chunk.start_line == 0 || chunk.start_line > chunk.end_line {
        return Err(DbError::InvalidInput(format!(
          "chunk {} has inverted line range {}-{}",
          chunk.id, chunk.start_line, chunk.end_line
        )));
      }
    }

    let table = self.table().await?;

    for group in rows.chunks(UPSERT_BATCH) {
      let ids: Vec<String> = group.iter().map(|(c, _)| format!("'{}'", escape_sql(&c.id))).collect();
      table.delete(&format!("id IN ({})", ids.join(", "))).await?;

      let batch = rows_to_batch(group, self.dimension())?;
      let iter = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.dimension()));
      table.add(Box::new(iter)).execute().await?;

      trace!(rows = group.len(), "upserted chunk batch");
    }

    Ok(())
  }

  /// Delete chunks by exact id.
  pub async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    debug!(count = ids.len(), "deleting chunks by id");
    let table = self.table().await?;
    for group in ids.chunks(UPSERT_BATCH) {
      let list: Vec<String> = group.iter().map(|id| format!("'{}'", escape_sql(id))).collect();
      table.delete(&format!("id IN ({})", list.join(", "))).await?;
    }
    Ok(())
  }

  /// Delete every chunk belonging to a file.
  pub async fn delete_by_file(&self, file_path: &str) -> Result<()> {
    debug!(file = %file_path, "deleting chunks for file");
    let table = self.table().await?;
    table.delete(&format!("file_path = '{}'", escape_sql(file_path))).await?;
    Ok(())
  }

  /// Top-k nearest neighbors under cosine distance, optionally filtered.
  ///
  /// Returns rows paired with a similarity score in [0, 1] (1 is nearest).
  pub async fn knn(&self, vector: &[f32], k: usize, filter: Option<&str>) -> Result<Vec<(Chunk, f32)>> {
    if vector.len() != self.dimension() {
      return Err(DbError::DimensionMismatch {
        expected: self.dimension(),
        got: vector.len(),
      });
    }

    debug!(k, has_filter = filter.is_some(), "vector search");
    let table = self.table().await?;

    let query = table
      .vector_search(vector.to_vec())?
      .distance_type(DistanceType::Cosine)
      .limit(k);
    let query = match filter {
      Some(f) => query.only_if(f),
      None => query,
    };

    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

    let mut rows = Vec::new();
    for batch in results {
      let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(&batch, i)?;
        let distance = distances.map(|arr| arr.value(i)).unwrap_or(0.0);
        let similarity = (1.0 - distance).clamp(0.0, 1.0);
        rows.push((chunk, similarity));
      }
    }

    Ok(rows)
  }

  /// Get one chunk row by id.
  pub async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>> {
    let rows = self
      .list_chunks(Some(&format!("id = '{}'", escape_sql(id))), Some(1))
      .await?;
    Ok(rows.into_iter().next())
  }

  /// Whether a chunk id exists in the table.
  pub async fn contains_id(&self, id: &str) -> Result<bool> {
    Ok(self.get_by_id(id).await?.is_some())
  }

  /// The embedding stored for a chunk id.
  pub async fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
    let table = self.table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("id = '{}'", escape_sql(id)))
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(extract_vector(batch, 0, self.dimension())?));
      }
    }
    Ok(None)
  }

  /// List chunk rows with an optional predicate and limit.
  pub async fn list_chunks(&self, filter: Option<&str>, limit: Option<usize>) -> Result<Vec<Chunk>> {
    let table = self.table().await?;
    let query = match (filter, limit) {
      (Some(f), Some(l)) => table.query().only_if(f).limit(l),
      (Some(f), None) => table.query().only_if(f),
      (None, Some(l)) => table.query().limit(l),
      (None, None) => table.query(),
    };

    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

    let mut chunks = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        chunks.push(batch_to_chunk(&batch, i)?);
      }
    }
    Ok(chunks)
  }

  /// List chunk rows together with their embeddings (clustering input).
  pub async fn list_chunks_with_vectors(&self, filter: Option<&str>) -> Result<Vec<(Chunk, Vec<f32>)>> {
    let table = self.table().await?;
    let query = match filter {
      Some(f) => table.query().only_if(f),
      None => table.query(),
    };
    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

    let mut rows = Vec::new();
    for batch in results {
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(&batch, i)?;
        let vector = extract_vector(&batch, i, self.dimension())?;
        rows.push((chunk, vector));
      }
    }
    Ok(rows)
  }

  /// Total row count.
  pub async fn count(&self) -> Result<usize> {
    let table = self.table().await?;
    Ok(table.count_rows(None).await?)
  }

  /// Distinct file paths present in the table.
  pub async fn list_file_paths(&self) -> Result<Vec<String>> {
    let chunks = self.list_chunks(None, None).await?;
    let mut paths: Vec<String> = chunks.into_iter().map(|c| c.file_path).collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
  }

  /// Write cluster assignments into the concept_id column.
  pub async fn set_concept_ids(&self, assignments: &[(String, i32)]) -> Result<()> {
    if assignments.is_empty() {
      return Ok(());
    }
    debug!(count = assignments.len(), "writing concept ids");
    let table = self.table().await?;

    // Group ids per concept so each cluster is one UPDATE.
    let mut by_concept: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (id, concept) in assignments {
      by_concept.entry(*concept).or_default().push(id.clone());
    }

    for (concept, ids) in by_concept {
      for group in ids.chunks(UPSERT_BATCH) {
        let list: Vec<String> = group.iter().map(|id| format!("'{}'", escape_sql(id))).collect();
        table
          .update()
          .only_if(format!("id IN ({})", list.join(", ")))
          .column("concept_id", concept.to_string())
          .execute()
          .await?;
      }
    }
    Ok(())
  }
}

/// Convert chunk rows to a single Arrow RecordBatch.
fn rows_to_batch(rows: &[(Chunk, Vec<f32>)], vector_dim: usize) -> Result<RecordBatch> {
  let ids: Vec<&str> = rows.iter().map(|(c, _)| c.id.as_str()).collect();
  let file_paths: Vec<&str> = rows.iter().map(|(c, _)| c.file_path.as_str()).collect();
  let contents: Vec<&str> = rows.iter().map(|(c, _)| c.content.as_str()).collect();
  let start_lines: Vec<u32> = rows.iter().map(|(c, _)| c.start_line).collect();
  let end_lines: Vec<u32> = rows.iter().map(|(c, _)| c.end_line).collect();
  let languages: Vec<&str> = rows.iter().map(|(c, _)| c.language.as_str()).collect();
  let symbol_names: Vec<Option<&str>> = rows.iter().map(|(c, _)| c.symbol_name.as_deref()).collect();
  let symbol_kinds: Vec<Option<&str>> = rows.iter().map(|(c, _)| Some(c.kind.as_str())).collect();
  let content_hashes: Vec<&str> = rows.iter().map(|(c, _)| c.content_hash.as_str()).collect();
  let concept_ids: Vec<Option<i32>> = rows.iter().map(|(c, _)| c.concept_id).collect();

  let mut all_vectors: Vec<f32> = Vec::with_capacity(rows.len() * vector_dim);
  for (_, vector) in rows {
    all_vectors.extend_from_slice(vector);
  }

  let vector_values = Float32Array::from(all_vectors);
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(vector_values), None)?;

  let batch = RecordBatch::try_new(
    chunks_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(ids)),
      Arc::new(StringArray::from(file_paths)),
      Arc::new(StringArray::from(contents)),
      Arc::new(UInt32Array::from(start_lines)),
      Arc::new(UInt32Array::from(end_lines)),
      Arc::new(StringArray::from(languages)),
      Arc::new(StringArray::from(symbol_names)),
      Arc::new(StringArray::from(symbol_kinds)),
      Arc::new(StringArray::from(content_hashes)),
      Arc::new(Int32Array::from(concept_ids)),
      Arc::new(vector_list),
    ],
  )?;

  Ok(batch)
}

/// Extract the embedding from a RecordBatch row.
fn extract_vector(batch: &RecordBatch, row: usize, vector_dim: usize) -> Result<Vec<f32>> {
  batch
    .column_by_name("vector")
    .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>())
    .and_then(|arr| {
      if arr.is_null(row) {
        return None;
      }
      let values = arr.value(row);
      let floats = values.as_any().downcast_ref::<Float32Array>()?;
      Some((0..vector_dim).map(|i| floats.value(i)).collect())
    })
    .ok_or_else(|| DbError::NotFound("vector column missing or null".into()))
}

/// Convert a RecordBatch row back to a Chunk.
fn batch_to_chunk(batch: &RecordBatch, row: usize) -> Result<Chunk> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };

  let get_string_opt = |name: &str| -> Option<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .filter(|a| !a.is_null(row))
      .map(|a| a.value(row).to_string())
  };

  let get_u32 = |name: &str| -> Result<u32> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };

  let concept_id = batch
    .column_by_name("concept_id")
    .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
    .filter(|a| !a.is_null(row))
    .map(|a| a.value(row));

  Ok(Chunk {
    id: get_string("id")?,
    file_path: get_string("file_path")?,
    content: get_string("content")?,
    start_line: get_u32("start_line")?,
    end_line: get_u32("end_line")?,
    language: Language::parse(&get_string("language")?),
    symbol_name: get_string_opt("symbol_name").filter(|s| !s.is_empty()),
    kind: ChunkKind::parse(&get_string("symbol_kind").unwrap_or_default()),
    content_hash: get_string("content_hash")?,
    concept_id,
  })
}
