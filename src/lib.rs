//! manaserv-store - account, character, guild and chat channel storage core.
//!
//! - [`db::Storage`]: identity cache and storage engine over a [`db::QueryExecutor`]
//! - [`state::ChannelRegistry`]: live chat channels and their ID allocator
//! - [`state::GuildDirectory`]: guilds, member rights and guild channels

pub mod config;
pub mod db;
pub mod error;
pub mod security;
pub mod state;

pub use db::Storage;
pub use error::{ErrorKind, GuildError, QueryError, StorageError};
