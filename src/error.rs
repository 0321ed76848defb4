//! Error types for invoice-match.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Document extraction errors (statements and invoices).
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("No extractable text in {0}")]
    NoText(PathBuf),

    #[error("Could not decode {0} with any known encoding")]
    Encoding(PathBuf),

    #[error("Could not identify required columns in {path}: missing {missing}")]
    MissingColumns { path: PathBuf, missing: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Excel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Email retrieval errors (IMAP and Graph).
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Message parse failed: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
