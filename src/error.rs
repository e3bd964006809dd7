//! Error types for the Commvault exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for Commvault exporter operations.
#[derive(Debug, Error)]
pub enum CvError {
    /// Error communicating with the Commvault API
    #[error("Commvault API error: {0}")]
    Api(#[from] reqwest::Error),

    /// Error parsing a Commvault API response
    #[error("Failed to parse Commvault API response: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Probe requested for a target not present in configuration
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, CvError>;
