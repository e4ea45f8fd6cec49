mod config_cmd;
mod drive_cmd;
mod image;
mod recipe;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use drive_cmd::{DriveCommand, DriveSubcommand, LoopbackAuthorizer, NonInteractiveAuthorizer};
pub use image::{ImageCommand, ImageSubcommand};
pub use recipe::{RecipeCommand, RecipeSubcommand};
pub use sync_cmd::SyncCommand;
