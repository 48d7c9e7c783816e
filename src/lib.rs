pub mod activity_sync;
pub mod auth;
pub mod common;
pub mod config;

pub use activity_sync::{ActivitySync, SyncReport};
pub use auth::{Authenticator, Credentials};
pub use common::types::{ExportError, ExportResult};
