//! convo CLI: inspect and maintain conversation storage. Config from env
//! (`.env` supported); see `Settings` for the recognized variables.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use convo_core::{init_tracing, Settings};
use convo_manager::ConversationManager;
use convo_storage::{migrate, Backend, ConversationStore};

#[derive(Parser)]
#[command(name = "convo")]
#[command(about = "Conversation storage CLI: stats, history, cleanup, migrate", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-user conversation statistics.
    Stats {
        /// User id to report on.
        user: String,
    },
    /// Print the active conversation's stored messages, oldest first.
    History {
        user: String,
        /// Keep only the most recent N messages.
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Run retention cleanup (age limit and per-user cap) once.
    Cleanup,
    /// Check backend health and print totals.
    Health,
    /// Copy all data into another backend (`json` or `sqlite`).
    Migrate {
        /// Destination backend kind.
        #[arg(long)]
        to: String,
        /// Destination location: directory for json, database file for
        /// sqlite.
        #[arg(long)]
        dest: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load();
    init_tracing(&settings.log_file)?;

    let cli = Cli::parse();
    let backend = Backend::connect(&settings)
        .await
        .context("failed to open storage backend")?;
    info!("storage backend: {}", backend.kind());

    match cli.command {
        Commands::Stats { user } => {
            let manager = ConversationManager::new(backend, settings);
            let stats = manager.get_stats(&user).await?;
            println!("user:                 {}", stats.user_id);
            println!("conversations:        {}", stats.conversation_count);
            println!("active conversations: {}", stats.active_conversation_count);
            println!("messages:             {}", stats.message_count);
            if let Some(first) = stats.first_seen {
                println!("first seen:           {first}");
            }
            if let Some(last) = stats.last_seen {
                println!("last seen:            {last}");
            }
        }
        Commands::History { user, limit } => {
            let manager = ConversationManager::new(backend, settings);
            let messages = manager.get_history(&user, limit).await?;
            if messages.is_empty() {
                println!("no active conversation for {user}");
            }
            for message in messages {
                println!(
                    "[{}] {:>9}: {}",
                    message.sequence, message.role, message.content
                );
            }
        }
        Commands::Cleanup => {
            let manager = ConversationManager::new(backend, settings);
            let removed = manager.run_cleanup(Utc::now()).await?;
            println!("removed {removed} conversations");
        }
        Commands::Health => {
            let report = backend.health_check().await?;
            println!("backend:       {}", report.backend);
            println!("healthy:       {}", report.healthy);
            println!("users:         {}", report.user_count);
            println!("conversations: {}", report.conversation_count);
            println!("messages:      {}", report.message_count);
        }
        Commands::Migrate { to, dest } => {
            let mut dest_settings = settings.clone();
            dest_settings.storage_backend = to.clone();
            match to.as_str() {
                "json" => dest_settings.json_storage_dir = dest.clone().into(),
                "sqlite" => dest_settings.database_url = dest.clone(),
                other => anyhow::bail!("unknown destination backend: {other}"),
            }
            let destination = Backend::connect(&dest_settings)
                .await
                .context("failed to open destination backend")?;
            let moved = migrate(&backend, &destination).await?;
            println!(
                "migrated {moved} conversations from {} to {}",
                backend.kind(),
                destination.kind()
            );
        }
    }

    Ok(())
}
