//! Sync CLI commands.

use chrono::{Local, TimeZone};
use clap::{Args, Subcommand};

use crate::db::SyncStateRepository;
use crate::sync::SyncEngine;

/// Sync with Google Drive
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
pub enum SyncSubcommand {
    /// Show last sync result
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        engine: Option<&SyncEngine>,
        state: &SyncStateRepository,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => {
                let Some(engine) = engine else {
                    println!("Google Drive is not configured.");
                    println!("Set drive.client_id and drive.token_service_url in config,");
                    println!("then run 'recipebox drive connect'.");
                    return Ok(());
                };

                println!("Syncing with Google Drive...");
                let report = engine.sync_now().await?;
                println!();
                println!(
                    "Sync complete: {} merged, {} downloaded, {} uploaded.",
                    report.merged, report.downloaded, report.uploaded
                );
                Ok(())
            }
            Some(SyncSubcommand::Status) => {
                let current = state.get().await?;
                match current.last_sync_at {
                    Some(ms) => match Local.timestamp_millis_opt(ms).single() {
                        Some(at) => {
                            println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S"))
                        }
                        None => println!("Last sync: {}", ms),
                    },
                    None => println!("Never synced."),
                }
                match &current.last_error {
                    Some(error) => println!("Last error: {}", error),
                    None => println!("No errors."),
                }
                Ok(())
            }
        }
    }
}
