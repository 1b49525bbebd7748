//! Error types for the dispatch system.
//!
//! The dispatch path itself never returns these: every network failure is
//! classified into a [`crate::domain::OutcomeKind`] where it happens. These
//! errors surface only from construction, configuration and the user directory.

use thiserror::Error;

/// Result type alias using the volley error type.
pub type Result<T> = std::result::Result<T, VolleyError>;

/// Main error type for the dispatch system.
#[derive(Error, Debug)]
pub enum VolleyError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// User directory query failed
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VolleyError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        VolleyError::InvalidConfig(message.into())
    }
}
