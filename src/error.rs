//! Defines the custom error types for the lead-sleuth application.

use std::time::Duration;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for the lead extraction pipeline.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// The browser driver reported a failure (navigation, lookup, script).
    #[error("Browser Error: {0}")]
    Browser(String),

    /// A page did not finish loading within its bound.
    #[error("Timed out after {limit:?} loading {stage} page: {url}")]
    Timeout {
        /// Which enrichment source was being loaded.
        stage: &'static str,
        /// The page address.
        url: String,
        /// The bound that elapsed.
        limit: Duration,
    },

    /// None of the feed-item selectors matched the search page.
    #[error("Could not find results panel for query '{0}'")]
    NoResultsPanelFound(String),

    /// Error reported by the lead database.
    #[error("Storage Error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// Indicates insufficient input data to proceed (e.g., an empty search term).
    #[error("Insufficient Input Data: {0}")]
    InsufficientInput(String),

    /// Failed to extract a domain from the provided URL.
    #[error("Failed to extract domain from URL: {0}")]
    DomainExtraction(String),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
