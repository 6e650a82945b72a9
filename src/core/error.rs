//! Crate-wide error type.

use thiserror::Error;

/// Errors that can bubble up out of the bot.
#[derive(Error, Debug)]
pub enum DallyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    #[error("password hash error: {0}")]
    PasswordHash(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DallyError>;
