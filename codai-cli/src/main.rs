//! Codai CLI Entry Point
//!
//! With a subcommand, runs that one command and exits. Without one, opens an
//! interactive prompt that reads commands from stdin until `exit` or EOF.

mod commands;
mod dispatch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codai_core::{CodaiConfig, Session};
use codai_utils::logging::{init_logging, LogLevel};
use commands::Command;
use dispatch::Flow;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "codai")]
#[command(about = "Codai - project context cache for a command-driven coding assistant")]
#[command(version)]
struct Cli {
    /// Project root directory
    #[arg(short = 'r', long, default_value = ".", env = "CODAI_ROOT")]
    root: PathBuf,

    /// Configuration file (TOML, JSON or YAML). Defaults to codai.toml in the root
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence
    #[arg(short = 'l', long)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List folders and files in a directory
    List {
        /// Directory relative to the root
        path: Option<PathBuf>,
    },

    /// Read a file through the content cache
    Read {
        path: PathBuf,
    },

    /// Show the directory tree
    Structure {
        path: Option<PathBuf>,

        /// Include paths the ignore rules would exclude
        #[arg(long)]
        include_ignored: bool,

        /// Only the immediate children of the path
        #[arg(long)]
        shallow: bool,

        /// Extra comma separated exclude patterns
        #[arg(short = 'e', long)]
        exclude: Option<String>,

        /// Also write the tree as a report (.json, .yaml or .yml)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Summarise the project from file metadata
    Study {
        path: Option<PathBuf>,

        /// Include paths the ignore rules would exclude
        #[arg(long)]
        include_ignored: bool,

        /// Only the immediate children of the path
        #[arg(long)]
        shallow: bool,

        /// Write the full report here (.json, .yaml or .yml)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Assemble a context window from the given files
    Context {
        /// Byte budget, defaults to the configured one
        #[arg(short = 'b', long)]
        budget: Option<u64>,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        let root = || PathBuf::from(".");
        match command {
            Commands::List { path } => Self::ListFiles {
                path: path.unwrap_or_else(root),
            },
            Commands::Read { path } => Self::Read { path },
            Commands::Structure {
                path,
                include_ignored,
                shallow,
                exclude,
                output,
            } => Self::ProjectStructure {
                path: path.unwrap_or_else(root),
                include_ignored,
                recurse: !shallow,
                exclude,
                output,
            },
            Commands::Study {
                path,
                include_ignored,
                shallow,
                output,
            } => Self::ProjectStudy {
                path: path.unwrap_or_else(root),
                include_ignored,
                recurse: !shallow,
                output,
            },
            Commands::Context { budget, paths } => Self::Context { budget, paths },
        }
    }
}

/// Run one command off the async runtime; walks and reads block
async fn run_command(session: &Session, command: Command) -> Result<Flow> {
    let session = session.clone();
    let (flow, output) = tokio::task::spawn_blocking(move || -> Result<(Flow, Vec<u8>)> {
        let mut output = Vec::new();
        let flow = dispatch::execute(&session, command, &mut output)?;
        Ok((flow, output))
    })
    .await
    .context("Command task failed")??;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output)?;
    stdout.flush()?;
    Ok(flow)
}

async fn interactive(session: &Session) -> Result<()> {
    println!("codai: project context at {}", session.root().display());
    println!("Type 'help' for commands, 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("codai> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            debug!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match run_command(session, command).await {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }

    info!("session closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CodaiConfig::load(&cli.root, cli.config.as_deref())
        .context("Failed to load configuration")?;

    let mut logger = config.logger_config(&cli.root);
    if let Some(level) = cli.log_level {
        logger.level = level;
    }
    init_logging(logger)?;

    let session = Session::open(&cli.root, config)
        .with_context(|| format!("Cannot open project at {}", cli.root.display()))?;

    match cli.command {
        Some(command) => {
            run_command(&session, command.into()).await?;
        }
        None => interactive(&session).await?,
    }

    Ok(())
}
