//! Tune - build Spotify playlists by talking to an agent

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    engage_command, init_command, status_command, threads_delete_command, threads_list_command,
    threads_show_command, DEFAULT_THREAD,
};

/// Tune - playlist agent for your terminal
#[derive(Parser)]
#[command(name = "tune")]
#[command(about = "♪ Build Spotify playlists by talking to an agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and checkpoint directory
    Init,
    /// Chat with the playlist agent
    Engage {
        /// Message to send
        #[arg(short, long)]
        message: Option<String>,
        /// Conversation thread ID
        #[arg(short, long, default_value = DEFAULT_THREAD)]
        thread: String,
    },
    /// Show configuration status
    Status,
    /// Inspect stored conversation threads
    Threads {
        #[command(subcommand)]
        command: ThreadCommands,
    },
}

#[derive(Subcommand)]
enum ThreadCommands {
    /// List stored threads
    List,
    /// Print a thread's messages
    Show { id: String },
    /// Delete a thread
    Delete { id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Engage { message, thread } => engage_command(message, thread).await,
        Commands::Status => status_command().await,
        Commands::Threads { command } => match command {
            ThreadCommands::List => threads_list_command().await,
            ThreadCommands::Show { id } => threads_show_command(id).await,
            ThreadCommands::Delete { id } => threads_delete_command(id).await,
        },
    };

    if let Err(e) = result {
        debug!("{:?}", e);
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
