//! memdc CLI
//!
//! Command-line interface for memory management.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memdc::config::{IndexBackend, Settings};
use memdc::error::Result;
use memdc::types::{CreateMemoryInput, SearchQuery, DEFAULT_K};
use memdc::warehouse::DEFAULT_SEARCH_LIMIT;
use memdc::MemoryService;

#[derive(Parser)]
#[command(name = "memdc")]
#[command(about = "Semantic memory CLI")]
#[command(version)]
struct Cli {
    /// Environment file loaded before reading settings
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Vector index backend, overrides INDEX_BACKEND (redis, memory)
    #[arg(long, global = true)]
    index: Option<IndexBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or replace) a memory
    Create {
        /// Text to remember
        text: String,
        /// Memory type
        #[arg(short, long, default_value = "generic")]
        r#type: String,
        /// Owner; defaults to the authenticated user
        #[arg(short, long)]
        user_id: Option<String>,
        /// Explicit id; an existing memory with this id is replaced
        #[arg(short, long)]
        memory_id: Option<String>,
        /// Lifecycle status
        #[arg(short, long, default_value = "active")]
        status: String,
        /// Optional title
        #[arg(long)]
        title: Option<String>,
    },
    /// Search memories by similarity
    Search {
        /// Search query
        query: String,
        /// Number of results (1-20)
        #[arg(short, long, default_value_t = DEFAULT_K)]
        k: usize,
        /// Filter by type
        #[arg(short, long)]
        r#type: Option<String>,
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,
        /// Filter by owner
        #[arg(short, long)]
        user_id: Option<String>,
    },
    /// Get a memory by id
    Get {
        /// Memory id
        id: String,
    },
    /// Delete a memory by id
    Delete {
        /// Memory id
        id: String,
    },
    /// Search the Data Cloud mirror
    SearchDc {
        /// Search query
        query: String,
        /// Restrict to one owner
        #[arg(short, long)]
        user_id: Option<String>,
        /// Maximum results
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.env_file.as_deref())?;
    if let Some(backend) = cli.index {
        settings.index_backend = backend;
    }

    // Logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if settings.debug { "debug" } else { "warn" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let service = MemoryService::from_settings(&settings).await?;

    match cli.command {
        Commands::Create {
            text,
            r#type,
            user_id,
            memory_id,
            status,
            title,
        } => {
            let mut input = CreateMemoryInput::new(text)
                .with_type(r#type)
                .with_status(status);
            if let Some(user_id) = user_id {
                input = input.with_user(user_id);
            }
            if let Some(memory_id) = memory_id {
                input = input.with_id(memory_id);
            }
            if let Some(title) = title {
                input = input.with_title(title);
            }

            let outcome = service.create(input).await?;
            println!("{}", outcome.redis_status);
            eprintln!("Data Cloud status: {}", outcome.dc_status);
        }

        Commands::Search {
            query,
            k,
            r#type,
            status,
            user_id,
        } => {
            let query = SearchQuery {
                memory_type: r#type,
                status,
                user_id,
                ..SearchQuery::new(query).with_k(k)
            };
            let results = service.search(query).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Get { id } => match service.get_by_id(&id).await? {
            Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
            None => {
                eprintln!("Memory {} not found", id);
                return Ok(ExitCode::FAILURE);
            }
        },

        Commands::Delete { id } => {
            if service.delete_by_id(&id).await? {
                println!("Deleted memory {}", id);
            } else {
                println!("Memory {} not found", id);
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::SearchDc {
            query,
            user_id,
            limit,
        } => {
            let hits = service
                .search_warehouse(&query, user_id.as_deref(), limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
