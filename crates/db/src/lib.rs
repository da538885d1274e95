pub mod chunks;
pub mod connection;
pub mod filter;
pub mod schema;

pub use connection::{DbError, Result, VectorStore};
pub use filter::FilterBuilder;
