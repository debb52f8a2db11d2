//! Eventide CLI - manage events from the terminal, online or not
//!
//! Writes land in the local store first and are pushed with `eventide sync`.

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;
use eventide_core::{HttpEventApi, NetworkStatus, SyncEngine};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, ConflictCommands};
use crate::commands::add::{run_add, AddOptions};
use crate::commands::common::build_patch;
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_init, run_config_show, ConfigUpdate};
use crate::commands::conflicts::{run_conflicts_auto, run_conflicts_list, run_conflicts_resolve};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::reset::run_reset;
use crate::commands::show::run_show;
use crate::commands::sync::{run_queue, run_retry, run_status, run_sync};
use crate::config::{default_config_path, CliConfig, FlagOverrides, Settings};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eventide=info")),
        )
        .init();

    let cli = Cli::parse();

    // Commands that never touch the store
    match &cli.command {
        Commands::Completions { shell, output } => {
            return run_completions(*shell, output.as_deref());
        }
        Commands::Config {
            command:
                ConfigCommands::Init {
                    timeout_secs,
                    page_size,
                },
        } => {
            let update = ConfigUpdate {
                api_url: cli.api_url.clone(),
                token: cli.token.clone(),
                db_path: cli.db_path.clone(),
                timeout_secs: *timeout_secs,
                page_size: *page_size,
            };
            run_config_init(&default_config_path()?, update)?;
            return Ok(());
        }
        _ => {}
    }

    let file_config = CliConfig::load().map_err(CliError::Config)?;
    let settings = Settings::resolve(
        &file_config,
        |name| std::env::var(name).ok(),
        FlagOverrides {
            api_url: cli.api_url,
            token: cli.token,
            db_path: cli.db_path,
        },
    )?;

    if let Commands::Config {
        command: ConfigCommands::Show { json },
    } = &cli.command
    {
        return run_config_show(&settings, *json);
    }

    let engine: SyncEngine<HttpEventApi> = SyncEngine::open(
        &settings.db_path,
        settings.sync_config(),
        NetworkStatus::new(!cli.offline),
    )
    .await?;
    tracing::debug!(db = %settings.db_path.display(), offline = cli.offline, "Opened local store");

    match cli.command {
        Commands::Add {
            title,
            starts_at,
            ends_at,
            venue,
            description,
            capacity,
        } => {
            let options = AddOptions {
                starts_at: starts_at.as_deref(),
                ends_at: ends_at.as_deref(),
                venue,
                description,
                capacity,
            };
            run_add(&engine, &title, options).await?;
        }
        Commands::List { page, limit, json } => run_list(&engine, page, limit, json).await?,
        Commands::Show { id, json } => run_show(&engine, &id, json).await?,
        Commands::Edit {
            id,
            title,
            starts_at,
            ends_at,
            venue,
            description,
            capacity,
        } => {
            let patch = build_patch(
                title,
                starts_at.as_deref(),
                ends_at.as_deref(),
                venue,
                description,
                capacity,
            )?;
            run_edit(&engine, &id, patch).await?;
        }
        Commands::Delete { id } => run_delete(&engine, &id).await?,
        Commands::Sync { json } => {
            run_sync(&engine, json).await?;
        }
        Commands::Status { json } => run_status(&engine, json).await?,
        Commands::Queue { json } => run_queue(&engine, json).await?,
        Commands::Retry { item_id } => {
            run_retry(&engine, &item_id).await?;
        }
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { limit, all, json } => {
                run_conflicts_list(&engine, limit, all, json).await?;
            }
            ConflictCommands::Resolve { id, strategy } => {
                run_conflicts_resolve(&engine, &id, strategy).await?;
            }
            ConflictCommands::Auto { strategy } => {
                run_conflicts_auto(&engine, strategy).await?;
            }
        },
        Commands::Reset { yes } => run_reset(&engine, yes).await?,
        Commands::Completions { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}
