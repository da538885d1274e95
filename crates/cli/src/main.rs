//! Command-line front end for the lodestone index engine.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lodestone", about = "Semantic code index and search", version)]
struct Cli {
  /// Project root to operate on (defaults to the current directory)
  #[arg(long, global = true)]
  project: Option<PathBuf>,

  /// Emit machine-readable JSON instead of human output
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Index the project into the vector store
  Index {
    /// Rebuild from scratch, ignoring prior state
    #[arg(long)]
    force: bool,
    /// Clear and rebuild when the store and manifest disagree
    #[arg(long)]
    repair: bool,
  },
  /// Hybrid semantic + keyword search
  Search {
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// Glob over file paths, e.g. "src/**"
    #[arg(long)]
    path: Option<String>,
    /// Restrict to languages, e.g. typescript, rust
    #[arg(long)]
    language: Vec<String>,
  },
  /// Find chunks similar to a snippet or file range
  Similar {
    /// Inline code snippet to match
    #[arg(long, conflicts_with = "file")]
    code: Option<String>,
    /// File whose line range to match
    #[arg(long, requires = "start")]
    file: Option<String>,
    #[arg(long)]
    start: Option<u32>,
    #[arg(long)]
    end: Option<u32>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// Drop results below this similarity
    #[arg(long)]
    threshold: Option<f32>,
    /// Keep the source chunk out of the results
    #[arg(long)]
    exclude_self: bool,
  },
  /// Compute or show concept clusters
  Concepts {
    /// Recompute even if a fresh clustering exists
    #[arg(long)]
    force: bool,
    /// List chunks for one concept id
    #[arg(long)]
    id: Option<i32>,
  },
  /// Show index health
  Status {
    /// Probe the store for sampled manifest chunk ids
    #[arg(long)]
    verify: bool,
  },
  /// Delete the index and all sidecar state
  Clear,
}

fn init_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
    )
    .with_target(false)
    .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_logging();
  let cli = Cli::parse();

  let project_root = match cli.project {
    Some(path) => path,
    None => std::env::current_dir()?,
  };

  let ctx = commands::Context::open(&project_root).await?;

  match cli.command {
    Command::Index { force, repair } => commands::index(&ctx, force, repair, cli.json).await,
    Command::Search {
      query,
      limit,
      path,
      language,
    } => commands::search(&ctx, &query, limit, path.as_deref(), &language, cli.json).await,
    Command::Similar {
      code,
      file,
      start,
      end,
      limit,
      threshold,
      exclude_self,
    } => {
      let query = search::SimilarQuery {
        code,
        filepath: file,
        start_line: start,
        end_line: end,
        limit,
        threshold,
        exclude_self,
      };
      commands::similar(&ctx, query, cli.json).await
    }
    Command::Concepts { force, id } => commands::concepts(&ctx, force, id, cli.json).await,
    Command::Status { verify } => commands::status(&ctx, verify, cli.json).await,
    Command::Clear => commands::clear(&ctx).await,
  }
}
