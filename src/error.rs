//! Error taxonomy for the alert and reporting engine.
//!
//! Expected outcomes such as "below threshold", "duplicate suppressed", and
//! "report already generated" are not errors; they surface as reason codes on
//! the structured results returned by the services.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid configuration, detected before any side effect.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A sender or recipient address failed to parse.
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The mail message could not be assembled.
    #[error("failed to build mail message: {0}")]
    Message(#[from] lettre::error::Error),

    /// Transport-level send failure; the alert stays unnotified so a later
    /// dispatch can re-attempt it.
    #[error("mail transport failed: {0}")]
    Transport(String),

    /// Operation referenced an alert that does not exist.
    #[error("alert {0} not found")]
    AlertNotFound(Uuid),

    /// A stored row holds a value the domain model cannot represent.
    #[error("corrupt database row: {0}")]
    CorruptRow(String),

    #[error("invalid uuid: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("csv import failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
