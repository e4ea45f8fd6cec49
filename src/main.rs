use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod db;
mod models;
mod sync;

use commands::{
    ConfigCommand, DriveCommand, ImageCommand, ImageSubcommand, LoopbackAuthorizer,
    NonInteractiveAuthorizer, RecipeCommand, RecipeSubcommand, SyncCommand,
};
use config::Config;
use db::{ImageRepository, RecipeRepository, SyncStateRepository};
use sync::{try_auto_sync, Authorizer, DriveClient, SyncEngine, TokenManager};

#[derive(Parser)]
#[command(name = "recipebox")]
#[command(version)]
#[command(about = "An offline-first recipe manager that syncs through Google Drive", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage recipes
    Recipe(RecipeCommand),

    /// Manage recipe images
    Image(ImageCommand),

    /// Manage the Google Drive connection
    Drive(DriveCommand),

    /// Sync with Google Drive
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config)?;

    // Config inspection must not create the database as a side effect.
    if let Some(Commands::Config(cmd)) = &cli.command {
        return cmd.run(&config);
    }

    let pool = db::init_db(config.database_path.value.clone()).await?;
    let state = SyncStateRepository::new(pool.clone());

    // Auto-sync BEFORE read commands so listings show other devices' edits.
    // Background passes never prompt; they fail quietly when unauthorized.
    if is_read_command(&cli.command) {
        if let Some(engine) = build_engine(&config, &pool, Arc::new(NonInteractiveAuthorizer)) {
            try_auto_sync(&engine, &state).await;
        }
    }

    execute_command(&cli.command, &config, &pool, &state).await?;

    // Auto-sync AFTER write commands (only if the command succeeded)
    if is_write_command(&cli.command) {
        if let Some(engine) = build_engine(&config, &pool, Arc::new(NonInteractiveAuthorizer)) {
            try_auto_sync(&engine, &state).await;
        }
    }

    Ok(())
}

async fn execute_command(
    command: &Option<Commands>,
    config: &Config,
    pool: &SqlitePool,
    state: &SyncStateRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Recipe(cmd)) => {
            cmd.run(&RecipeRepository::new(pool.clone())).await?;
        }
        Some(Commands::Image(cmd)) => {
            cmd.run(
                &ImageRepository::new(pool.clone()),
                &RecipeRepository::new(pool.clone()),
            )
            .await?;
        }
        Some(Commands::Drive(cmd)) => {
            cmd.run(config, state).await?;
        }
        Some(Commands::Sync(cmd)) => {
            // An explicit sync may prompt for consent when needed.
            let authorizer = config
                .drive
                .client_id
                .clone()
                .map(|id| Arc::new(LoopbackAuthorizer::new(id)) as Arc<dyn Authorizer>);
            let engine = authorizer.and_then(|a| build_engine(config, pool, a));
            cmd.run(engine.as_ref(), state).await?;
        }
        // handled before the database is opened
        Some(Commands::Config(_)) => {}
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

fn build_engine(
    config: &Config,
    pool: &SqlitePool,
    authorizer: Arc<dyn Authorizer>,
) -> Option<SyncEngine> {
    config.drive.client_id.as_ref()?;
    let service_url = config.drive.token_service_url.clone()?;

    let state = SyncStateRepository::new(pool.clone());
    let tokens = TokenManager::new(service_url, state.clone(), authorizer);
    Some(SyncEngine::new(
        DriveClient::new(tokens),
        RecipeRepository::new(pool.clone()),
        ImageRepository::new(pool.clone()),
        state,
    ))
}

/// Returns true if the command is a read operation that should sync before execution.
fn is_read_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(Commands::Recipe(r)) if matches!(r.command,
            RecipeSubcommand::List { .. } | RecipeSubcommand::Show { .. })
    ) || matches!(
        cmd,
        Some(Commands::Image(i)) if matches!(i.command, ImageSubcommand::List)
    )
}

/// Returns true if the command is a write operation that should sync after execution.
fn is_write_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(Commands::Recipe(r)) if matches!(r.command,
            RecipeSubcommand::Add { .. }
            | RecipeSubcommand::Delete { .. }
            | RecipeSubcommand::Favorite { .. })
    ) || matches!(
        cmd,
        Some(Commands::Image(i)) if matches!(i.command,
            ImageSubcommand::Add { .. } | ImageSubcommand::Remove { .. })
    )
}
