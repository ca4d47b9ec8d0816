//! Custom error types for archivist

use thiserror::Error;

/// Main error type for archivist operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid backup file: {}", format_backup_detail(.errors, .dimensions))]
    InvalidBackup {
        errors: Vec<String>,
        dimensions: Vec<usize>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

fn format_backup_detail(errors: &[String], dimensions: &[usize]) -> String {
    let mut detail = format!("{} error(s)", errors.len());
    if !errors.is_empty() {
        detail.push_str(": ");
        detail.push_str(&errors.join("; "));
    }
    if dimensions.len() > 1 {
        let dims: Vec<String> = dimensions.iter().map(|d| d.to_string()).collect();
        detail.push_str(&format!(
            " (inconsistent embedding dimensions: {})",
            dims.join(", ")
        ));
    }
    detail
}

/// Result type alias for archivist
pub type Result<T> = std::result::Result<T, Error>;
