//! Domain error types for the game store
//!
//! Errors keep enough structure for logging while `GameError::exit_code`
//! gives the command line a stable mapping.

use thiserror::Error;

/// Top-level error type
#[derive(Error, Debug)]
pub enum GameError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Invalid score {0}: scores must be non-negative")]
    InvalidScore(i64),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Achievement evaluation failed: {0}")]
    Rule(#[from] RuleError),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] anyhow::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("Achievement {achievement_id} ({name}) has no threshold")]
    MissingThreshold { achievement_id: i64, name: String },

    #[error("Unknown achievement condition type: {0}")]
    UnknownCondition(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable not set: {0}")]
    MissingEnv(String),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl StoreError {
    /// True when the error is a unique-constraint violation reported by the
    /// database.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl GameError {
    /// Process exit code for the command line
    pub fn exit_code(&self) -> u8 {
        match self {
            GameError::Store(StoreError::UserNotFound(_) | StoreError::GameNotFound(_)) => 2,
            GameError::Store(
                StoreError::InvalidScore(_) | StoreError::Invalid(_) | StoreError::UserExists(_),
            ) => 3,
            GameError::Store(StoreError::Rule(_)) | GameError::Rule(_) => 4,
            GameError::Store(_) => 5,
            GameError::Config(_) => 78,
            GameError::Io(_) => 74,
        }
    }
}
