pub mod chunk;
pub mod config;
pub mod error;

pub use chunk::{Chunk, ChunkId, ChunkKind, Language};
pub use config::{ChunkingConfig, Config, EmbeddingBackendKind, EmbeddingConfig, SearchConfig};
pub use error::{EngineError, EngineResult};

/// Directory created next to the indexed project for all persisted state.
pub const DATA_DIR_NAME: &str = ".lodestone";

/// Current on-disk schema version for the manifest and cluster sidecars.
pub const SCHEMA_VERSION: u32 = 1;
