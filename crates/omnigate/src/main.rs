//! Omnigate - approval-gated actions from the terminal

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    chat_command, init_command, log_rotate_command, log_tail_command, status_command,
    task_add_command, task_list_command, vault_change_pin_command, vault_delete_command,
    vault_get_command, vault_history_command, vault_restore_command, vault_set_command,
};

/// Omnigate - every side effect waits for your yes
#[derive(Parser)]
#[command(name = "omnigate")]
#[command(about = "◆ Approval-gated action execution")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and create the data directory
    Init,
    /// Interactive session
    Chat {
        /// Session ID
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Manage vault secrets
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Inspect the event log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
    /// Queue actions for the next chat session
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Show file locations and state
    Status,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Store a secret, archiving any previous value
    Set { name: String },
    /// Print a secret's current or archived value
    Get {
        name: String,
        /// Read from the archive instead of the current value
        #[arg(short, long)]
        archived: bool,
        /// Archive index, newest first
        #[arg(short, long, default_value_t = 0)]
        index: usize,
    },
    /// List archived versions of a secret
    History { name: String },
    /// Make an archived version current again
    Restore {
        name: String,
        /// Archive index, newest first
        index: usize,
    },
    /// Delete a secret, keeping its archive unless told otherwise
    Delete {
        name: String,
        #[arg(long)]
        erase_archive: bool,
    },
    /// Re-encrypt the vault under a new PIN
    ChangePin,
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show the most recent events
    Tail {
        #[arg(short, long, default_value_t = 20)]
        rows: usize,
    },
    /// Move the current log aside
    Rotate,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Queue an action request
    Add {
        /// Action kind, e.g. shell_command
        kind: String,
        /// JSON parameters
        #[arg(default_value = "{}")]
        params: String,
        /// Lower runs first
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
    },
    /// List queued actions in run order
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (label, result) = match cli.command {
        Commands::Init => ("Init", init_command().await),
        Commands::Chat { session } => ("Chat", chat_command(session).await),
        Commands::Vault { command } => match command {
            VaultCommands::Set { name } => ("Vault set", vault_set_command(name).await),
            VaultCommands::Get {
                name,
                archived,
                index,
            } => ("Vault get", vault_get_command(name, archived, index).await),
            VaultCommands::History { name } => {
                ("Vault history", vault_history_command(name).await)
            }
            VaultCommands::Restore { name, index } => {
                ("Vault restore", vault_restore_command(name, index).await)
            }
            VaultCommands::Delete {
                name,
                erase_archive,
            } => ("Vault delete", vault_delete_command(name, erase_archive).await),
            VaultCommands::ChangePin => ("Change PIN", vault_change_pin_command().await),
        },
        Commands::Log { command } => match command {
            LogCommands::Tail { rows } => ("Log tail", log_tail_command(rows).await),
            LogCommands::Rotate => ("Log rotate", log_rotate_command().await),
        },
        Commands::Task { command } => match command {
            TaskCommands::Add {
                kind,
                params,
                priority,
            } => ("Task add", task_add_command(kind, params, priority).await),
            TaskCommands::List => ("Task list", task_list_command().await),
        },
        Commands::Status => ("Status", status_command().await),
    };

    if let Err(e) = result {
        error!("{} failed: {:#}", label, e);
        std::process::exit(1);
    }
}
