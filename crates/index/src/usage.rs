//! Append-only operational counters.
//!
//! Best-effort: failures to record are logged and never fail the caller.
//! Not part of the query contract.

use std::{io::Write, path::PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
struct UsageRecord<'a> {
  timestamp: chrono::DateTime<Utc>,
  operation: &'a str,
  count: usize,
}

/// Appends one JSON line per recorded operation to `usage.json`.
#[derive(Debug, Clone)]
pub struct UsageLog {
  path: PathBuf,
}

impl UsageLog {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  pub fn record(&self, operation: &str, count: usize) {
    let record = UsageRecord {
      timestamp: Utc::now(),
      operation,
      count,
    };

    let result = (|| -> std::io::Result<()> {
      if let Some(parent) = self.path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
      let line = serde_json::to_string(&record).unwrap_or_default();
      writeln!(file, "{line}")
    })();

    if let Err(e) = result {
      warn!(path = %self.path.display(), error = %e, "failed to record usage");
    }
  }
}
