mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Types
// ============================================================================

/// Valet - a personal assistant runtime for agents, sessions, and scheduled tasks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive chat session with an agent
    Chat {
        /// Id of the agent to chat with
        #[arg(short, long)]
        agent: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },

    /// Manage scheduled tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Manage stored sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    /// Execute a task immediately and wait for it to finish
    Run {
        /// Task name
        name: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },

    /// List configured tasks and their last runs
    List {
        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List sessions
    List {
        /// Show archived sessions instead of active ones
        #[arg(long)]
        archived: bool,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },

    /// Move a session to the archive
    Archive {
        /// Session id
        id: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },

    /// Move an archived session back to active
    Restore {
        /// Session id
        id: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },

    /// Delete a session permanently
    Delete {
        /// Session id
        id: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "valet.yaml")]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { agent, config } => commands::chat::run(&agent, &config).await,
        Commands::Task { action } => match action {
            TaskAction::Run { name, config } => commands::task::run(&name, &config).await,
            TaskAction::List { config } => commands::task::list(&config).await,
        },
        Commands::Session { action } => match action {
            SessionAction::List { archived, config } => {
                commands::session::list(&config, archived).await
            }
            SessionAction::Archive { id, config } => {
                commands::session::archive(&id, &config).await
            }
            SessionAction::Restore { id, config } => {
                commands::session::restore(&id, &config).await
            }
            SessionAction::Delete { id, config } => {
                commands::session::delete(&id, &config).await
            }
        },
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
