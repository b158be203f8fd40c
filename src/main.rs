//! # AiBot CLI (`aibot`)
//!
//! The `aibot` binary runs the chat server and offers a few commands for
//! trying the pipeline out from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! aibot --config ./config/aibot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aibot serve` | Start the HTTP chat server |
//! | `aibot ask "<question>"` | Answer one question with the configured pipeline |
//! | `aibot match "<query>"` | Show the best-matching document |
//! | `aibot docs` | List loaded documents |
//! | `aibot chat` | Chat with a running server from the terminal |
//! | `aibot tools` | List built-in tools and their schemas |
//! | `aibot completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Start the server (reads MISTRAL_API_KEY from the environment or .env)
//! aibot serve --config ./config/aibot.toml
//!
//! # One-off question, streamed to stdout
//! aibot ask "what's the weather in Delhi in C"
//!
//! # Which document would RAG pick?
//! aibot match "how long does shipping take" --strategy keyword
//!
//! # Talk to a server on another port
//! aibot chat --url http://127.0.0.1:8080
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for more detail.

use aibot::config::{self, Config, RetrievalStrategy};
use aibot::{client, documents, pipeline, retrieval, server, tools};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// AiBot: a streaming chat relay with document retrieval and a weather tool.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Commands that can run without one fall back to defaults.
#[derive(Parser)]
#[command(
    name = "aibot",
    about = "AiBot: a streaming chat relay with document retrieval and a weather tool",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/aibot.toml`.
    #[arg(long, global = true, default_value = "./config/aibot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat server.
    ///
    /// Binds to `[server].bind` and serves `POST /api/chat` and `GET /health`.
    Serve,

    /// Answer a single question in-process and print the answer.
    Ask {
        /// The question to ask.
        question: String,

        /// Print `{"answer": ...}` instead of streaming plain text. Under the
        /// `rag` pipeline a failed answer prints an apology instead of an error.
        #[arg(long)]
        json: bool,
    },

    /// Print the document that best matches a query.
    Match {
        /// The query string.
        query: String,

        /// Override `[retrieval].strategy`.
        #[arg(long, value_enum)]
        strategy: Option<RetrievalStrategy>,
    },

    /// List the loaded documents.
    Docs,

    /// Chat with a running server from the terminal.
    ///
    /// Enter sends. End a line with `\` to continue on the next line.
    /// `/theme` toggles the theme, `/quit` exits.
    Chat {
        /// Server root URL. Defaults to `http://<server.bind>`.
        #[arg(long)]
        url: Option<String>,
    },

    /// List built-in tools with their parameter schemas.
    Tools,

    /// Print shell completions to stdout.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Load the config file, or fall back to defaults when it does not exist.
///
/// A file that exists but fails to parse or validate is still an error.
fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Tools => {
            tools::list_tools()?;
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "aibot", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { question, json } => {
            pipeline::run_ask(&cfg, &question, json).await?;
        }
        Commands::Match { query, strategy } => {
            retrieval::run_match(&cfg, &query, strategy).await?;
        }
        Commands::Docs => {
            documents::list_documents(&cfg)?;
        }
        Commands::Chat { url } => {
            let url = url.unwrap_or_else(|| format!("http://{}", cfg.server.bind));
            client::run_chat(&url).await?;
        }
        Commands::Tools | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
