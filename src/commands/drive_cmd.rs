//! Google Drive connection commands.
//!
//! `connect` runs the interactive consent flow: a consent URL is printed, a
//! loopback HTTP server catches the redirect, and the one-time code is
//! exchanged through the token service. The client secret never touches this
//! machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::Query, response::Html, routing::get, Router};
use chrono::{Local, TimeZone};
use clap::{Args, Subcommand, ValueEnum};
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::db::SyncStateRepository;
use crate::sync::{AuthorizationCode, Authorizer, TokenError, TokenManager};

const CONSENT_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Manage the Google Drive connection
#[derive(Args)]
pub struct DriveCommand {
    #[command(subcommand)]
    pub command: DriveSubcommand,
}

#[derive(Subcommand)]
pub enum DriveSubcommand {
    /// Authorize this machine and store credentials
    Connect,
    /// Remove stored credentials
    Disconnect,
    /// Enable or disable automatic sync around commands
    Autosync {
        #[arg(value_enum)]
        state: AutosyncState,
    },
    /// Show connection status
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AutosyncState {
    On,
    Off,
}

impl DriveCommand {
    pub async fn run(
        &self,
        config: &Config,
        state: &SyncStateRepository,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            DriveSubcommand::Connect => {
                let (client_id, service_url) = match (
                    config.drive.client_id.clone(),
                    config.drive.token_service_url.clone(),
                ) {
                    (Some(id), Some(url)) => (id, url),
                    _ => return Err(Box::new(TokenError::NotConfigured)),
                };

                let tokens = TokenManager::new(
                    service_url,
                    state.clone(),
                    Arc::new(LoopbackAuthorizer::new(client_id)),
                );
                // Forces the interactive flow when no credential is stored.
                tokens.get_valid_token().await?;
                println!("Connected to Google Drive.");
                println!("Run 'recipebox sync' to synchronize, or enable 'recipebox drive autosync on'.");
                Ok(())
            }
            DriveSubcommand::Disconnect => {
                let (Some(_), Some(service_url)) = (
                    config.drive.client_id.as_ref(),
                    config.drive.token_service_url.clone(),
                ) else {
                    return Err(Box::new(TokenError::NotConfigured));
                };
                let tokens = TokenManager::new(
                    service_url,
                    state.clone(),
                    Arc::new(NonInteractiveAuthorizer),
                );
                tokens.sign_out().await?;
                println!("Disconnected. Stored credentials removed.");
                Ok(())
            }
            DriveSubcommand::Autosync { state: autosync } => {
                let enabled = matches!(autosync, AutosyncState::On);
                state.update(|s| s.auto_sync = enabled).await?;
                println!(
                    "Auto-sync {}.",
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(())
            }
            DriveSubcommand::Status => {
                let current = state.get().await?;
                println!("Google Drive");
                println!("============");
                if !config.drive.is_configured() {
                    println!("Status: not configured");
                    println!();
                    println!("Add to your config file:");
                    println!();
                    println!("  drive:");
                    println!("    client_id: \"<oauth-client-id>\"");
                    println!("    token_service_url: \"https://tokens.example.com\"");
                    return Ok(());
                }
                println!(
                    "Status:    {}",
                    if current.is_connected() {
                        "connected"
                    } else {
                        "not connected (run 'recipebox drive connect')"
                    }
                );
                println!(
                    "Auto-sync: {}",
                    if current.auto_sync { "enabled" } else { "disabled" }
                );
                match current.last_sync_at {
                    Some(ms) => match Local.timestamp_millis_opt(ms).single() {
                        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S")),
                        None => println!("Last sync: {}", ms),
                    },
                    None => println!("Last sync: never"),
                }
                if let Some(error) = &current.last_error {
                    println!("Last error: {}", error);
                }
                Ok(())
            }
        }
    }
}

/// Interactive consent over a loopback redirect: print the consent URL, catch
/// the one-time code on a local HTTP server, hand it back for exchange.
pub struct LoopbackAuthorizer {
    client_id: String,
}

impl LoopbackAuthorizer {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Authorizer for LoopbackAuthorizer {
    async fn obtain_code(&self) -> Result<AuthorizationCode, TokenError> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TokenError::Authorization(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| TokenError::Authorization(e.to_string()))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);

        let (tx, rx) = oneshot::channel::<Result<String, String>>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let tx_clone = tx.clone();
        let server_handle = tokio::spawn(async move {
            let app = Router::new().route(
                "/callback",
                get(move |Query(params): Query<CallbackParams>| {
                    let tx = tx_clone.clone();
                    async move {
                        if let Some(tx) = tx.lock().unwrap().take() {
                            let _ = tx.send(match params.code {
                                Some(code) => Ok(code),
                                None => Err(params
                                    .error
                                    .unwrap_or_else(|| "authorization denied".to_string())),
                            });
                        }

                        Html(
                            r#"<!DOCTYPE html>
<html>
<head><title>RecipeBox - Success</title></head>
<body>
<h1>Authorization complete!</h1>
<p>You can close this window and return to the terminal.</p>
</body>
</html>"#,
                        )
                    }
                }),
            );

            let _ = axum::serve(listener, app).await;
        });

        let url = reqwest::Url::parse_with_params(
            CONSENT_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| TokenError::Authorization(e.to_string()))?;

        println!("Open this URL in your browser to authorize access:");
        println!();
        println!("  {}", url);
        println!();
        println!("Waiting for authorization (timeout: 5 minutes)");

        let result = tokio::time::timeout(CONSENT_TIMEOUT, rx).await;
        server_handle.abort();

        match result {
            Ok(Ok(Ok(code))) => Ok(AuthorizationCode { code, redirect_uri }),
            Ok(Ok(Err(error))) => Err(TokenError::Authorization(error)),
            _ => Err(TokenError::Authorization(
                "timed out waiting for authorization".to_string(),
            )),
        }
    }
}

/// Fails instead of prompting. Used where a consent URL would be unexpected,
/// e.g. auto-sync in the background of another command.
pub struct NonInteractiveAuthorizer;

#[async_trait]
impl Authorizer for NonInteractiveAuthorizer {
    async fn obtain_code(&self) -> Result<AuthorizationCode, TokenError> {
        Err(TokenError::Authorization(
            "authorization required; run 'recipebox drive connect'".to_string(),
        ))
    }
}
