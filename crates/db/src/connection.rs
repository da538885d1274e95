use std::path::{Path, PathBuf};

use lancedb::{Connection, connect};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::schema::{CHUNKS_TABLE, chunks_schema};

#[derive(Error, Debug)]
pub enum DbError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Invalid input: {0}")]
  InvalidInput(String),
  #[error("Dimension mismatch: vector has {got} values, table expects {expected}")]
  DimensionMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for lodestone_core::EngineError {
  fn from(err: DbError) -> Self {
    match err {
      DbError::InvalidInput(msg) => lodestone_core::EngineError::Validation(msg),
      other => lodestone_core::EngineError::Storage(other.to_string()),
    }
  }
}

/// Thin facade over a LanceDB table directory.
///
/// The store owns the table handle exclusively; the dimension is fixed at
/// open time and every write is validated against it.
pub struct VectorStore {
  pub(crate) connection: Connection,
  db_path: PathBuf,
  dimension: usize,
}

impl VectorStore {
  /// Open the table at `path`, creating it if absent.
  pub async fn open_or_create(path: &Path, dimension: usize) -> Result<Self> {
    if dimension == 0 {
      return Err(DbError::InvalidInput("vector dimension must be non-zero".into()));
    }
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    info!(path = %path.display(), dimension, "opening vector store");
    let connection = match connect(path.to_string_lossy().as_ref()).execute().await {
      Ok(conn) => conn,
      Err(e) => {
        error!(path = %path.display(), err = %e, "failed to connect to vector store");
        return Err(e.into());
      }
    };

    let store = Self {
      connection,
      db_path: path.to_path_buf(),
      dimension,
    };
    store.ensure_table().await?;
    Ok(store)
  }

  async fn ensure_table(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;
    if !table_names.contains(&CHUNKS_TABLE.to_string()) {
      debug!("creating chunks table");
      self
        .connection
        .create_empty_table(CHUNKS_TABLE, chunks_schema(self.dimension))
        .execute()
        .await?;
    }
    Ok(())
  }

  pub(crate) async fn table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table(CHUNKS_TABLE).execute().await?)
  }

  pub fn dimension(&self) -> usize {
    self.dimension
  }

  pub fn path(&self) -> &Path {
    &self.db_path
  }

  /// Drop and recreate the table, discarding every row.
  pub async fn clear(&self) -> Result<()> {
    info!("clearing vector store");
    let table_names = self.connection.table_names().execute().await?;
    if table_names.contains(&CHUNKS_TABLE.to_string()) {
      self.connection.drop_table(CHUNKS_TABLE).await?;
    }
    self
      .connection
      .create_empty_table(CHUNKS_TABLE, chunks_schema(self.dimension))
      .execute()
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[tokio::test]
  async fn test_open_creates_table() {
    let temp = TempDir::new().unwrap();
    let store = VectorStore::open_or_create(&temp.path().join("vectors"), 8).await.unwrap();

    let tables = store.connection.table_names().execute().await.unwrap();
    assert!(tables.contains(&CHUNKS_TABLE.to_string()));
    assert_eq!(store.dimension(), 8);
  }

  #[tokio::test]
  async fn test_zero_dimension_rejected() {
    let temp = TempDir::new().unwrap();
    let result = VectorStore::open_or_create(&temp.path().join("vectors"), 0).await;
    assert!(matches!(result, Err(DbError::InvalidInput(_))));
  }

  #[tokio::test]
  async fn test_reopen_existing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("vectors");
    drop(VectorStore::open_or_create(&path, 8).await.unwrap());
    let store = VectorStore::open_or_create(&path, 8).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
  }
}
