//! Bidirectional synchronization with Google Drive.
//!
//! The engine merges the recipe collection last-writer-wins, reconciles the
//! image collection (pull, remote-deletion detection, push, orphan
//! tombstoning, retention purge), and keeps every credential and layout id in
//! the single sync-state row. All network access goes through [`DriveClient`],
//! which in turn goes through [`TokenManager`].

mod auto;
mod drive;
mod engine;
mod error;
mod multipart;
mod payload;
mod single_flight;
mod token;

pub use auto::try_auto_sync;
pub use drive::{DriveClient, DriveFileMeta};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, TokenError};
pub use payload::{RemotePayload, PAYLOAD_FORMAT};
pub use single_flight::SingleFlight;
pub use token::{AuthorizationCode, Authorizer, TokenManager};
