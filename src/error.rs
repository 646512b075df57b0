//! Unified error handling for the storage core.
//!
//! Three failure families reach callers:
//! - conflicts (duplicate username, email, character or guild name),
//! - invariant violations (capacity limits, missing membership, rights),
//! - backend failures (the query executor could not finish a statement).
//!
//! "Not found" is never an error here: lookups return `Option`.

use thiserror::Error;

/// Broad classification used by the network layer to pick a protocol code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A uniqueness check failed before anything was written.
    Conflict,
    /// The request is well formed but not allowed in the current state.
    Invariant,
    /// The backing store failed.
    Backend,
}

// ============================================================================
// Query Errors (executor)
// ============================================================================

/// Errors raised by a [`QueryExecutor`](crate::db::QueryExecutor).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("connection is closed")]
    Closed,

    #[error("column {column}: expected {expected}")]
    Decode {
        column: usize,
        expected: &'static str,
    },
}

// ============================================================================
// Storage Errors (identity cache & storage engine)
// ============================================================================

/// Errors returned by [`Storage`](crate::db::Storage) operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("query execution failure: {0}")]
    Query(#[from] QueryError),

    #[error("username already exists: {0}")]
    UsernameTaken(String),

    #[error("email address already exists: {0}")]
    EmailTaken(String),

    #[error("character name already exists: {0}")]
    CharacterNameTaken(String),

    #[error("guild name already exists: {0}")]
    GuildNameTaken(String),

    #[error("account already has {limit} characters")]
    TooManyCharacters { limit: usize },

    #[error("{0} has not been stored yet")]
    NotPersisted(&'static str),

    #[error("password hashing failed")]
    Password,

    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UsernameTaken(_)
            | Self::EmailTaken(_)
            | Self::CharacterNameTaken(_)
            | Self::GuildNameTaken(_) => ErrorKind::Conflict,
            Self::TooManyCharacters { .. } | Self::NotPersisted(_) | Self::Password => {
                ErrorKind::Invariant
            }
            Self::Query(_) | Self::Closed => ErrorKind::Backend,
        }
    }

    /// Get a static error code string for log and protocol mapping.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Query(_) => "query_failure",
            Self::UsernameTaken(_) => "username_taken",
            Self::EmailTaken(_) => "email_taken",
            Self::CharacterNameTaken(_) => "character_name_taken",
            Self::GuildNameTaken(_) => "guild_name_taken",
            Self::TooManyCharacters { .. } => "too_many_characters",
            Self::NotPersisted(_) => "not_persisted",
            Self::Password => "password",
            Self::Closed => "closed",
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Query(QueryError::Sqlx(err))
    }
}

// ============================================================================
// Guild Errors (directory operations)
// ============================================================================

/// Guild directory errors.
#[derive(Debug, Error)]
pub enum GuildError {
    #[error("no such guild: {0}")]
    NoSuchGuild(i64),

    #[error("{0} is not a member of this guild")]
    NotAMember(String),

    #[error("{0} is already a member of this guild")]
    AlreadyMember(String),

    #[error("insufficient guild rights")]
    InsufficientRights,

    #[error("a guild must keep at least one owner")]
    LastOwner,

    #[error("no channel id available")]
    ChannelExhausted,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => e.kind(),
            Self::ChannelExhausted => ErrorKind::Backend,
            _ => ErrorKind::Invariant,
        }
    }

    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoSuchGuild(_) => "no_such_guild",
            Self::NotAMember(_) => "not_a_member",
            Self::AlreadyMember(_) => "already_member",
            Self::InsufficientRights => "insufficient_rights",
            Self::LastOwner => "last_owner",
            Self::ChannelExhausted => "channel_exhausted",
            Self::Storage(e) => e.error_code(),
        }
    }
}
