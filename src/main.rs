mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cli::feedback::FeedbackAction;
use trilogy_brain::config::TrilogyConfig;
use trilogy_brain::context::AppContext;
use trilogy_brain::{dashboard, server};

#[derive(Parser)]
#[command(
    name = "trilogy",
    version,
    about = "Feedback loop, knowledge retrieval and health monitoring for VOT1"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the configured endpoints
    Feedback {
        /// Run a single cycle and print the results
        #[arg(long, conflicts_with_all = ["status", "history"])]
        run_once: bool,
        /// Print the loop configuration
        #[arg(long, conflicts_with = "history")]
        status: bool,
        /// Run a cycle and print the retained history
        #[arg(long)]
        history: bool,
        /// Polling interval in seconds (overrides the config file)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Check component health
    Health {
        /// Attempt to repair unhealthy components, then re-check
        #[arg(long)]
        repair: bool,
    },
    /// Search the knowledge graph
    Search {
        /// Search query
        query: String,
        /// Only match nodes carrying this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Maximum number of results
        #[arg(long, value_parser = cli::search::parse_limit)]
        limit: Option<usize>,
        /// Skip embeddings and rank by keyword overlap
        #[arg(long)]
        keyword: bool,
    },
    /// Import nodes and links from a JSON file
    Import {
        /// Path to a {"nodes": [...], "links": [...]} document
        file: PathBuf,
    },
    /// Show knowledge graph statistics
    Stats,
    /// Start the dashboard HTTP/WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Start the MCP server (stdio transport)
    Mcp,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.trilogy/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            eprint!("{e}");
            std::process::exit(1);
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    let config = TrilogyConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Feedback {
            run_once,
            status,
            history,
            interval,
        } => {
            let action = if run_once {
                FeedbackAction::RunOnce
            } else if status {
                FeedbackAction::Status
            } else if history {
                FeedbackAction::History
            } else {
                FeedbackAction::Run
            };
            cli::feedback::feedback(&config, action, interval).await?;
        }
        Command::Health { repair } => {
            cli::health::health(&config, repair).await?;
        }
        Command::Search {
            query,
            tags,
            limit,
            keyword,
        } => {
            cli::search::search(&config, &query, tags, limit, keyword).await?;
        }
        Command::Import { file } => {
            cli::import::import(&config, &file)?;
        }
        Command::Stats => {
            cli::stats::stats(&config)?;
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let ctx = Arc::new(AppContext::build(config)?);
            dashboard::serve(ctx, &host, port).await?;
        }
        Command::Mcp => {
            let ctx = Arc::new(AppContext::build(config)?);
            server::serve_stdio(ctx).await?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
