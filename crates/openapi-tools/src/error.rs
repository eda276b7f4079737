//! Error types for `openapi-mcp-tools`.

use thiserror::Error;

/// Main error type for `OpenAPI` tooling.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Invalid tool input (missing/invalid path, query, header or body parameter).
    ///
    /// Raised before any outbound request is made; the message is caller-facing.
    #[error("{0}")]
    Validation(String),

    /// The backend answered with a non-success status.
    #[error("Failed to fetch from API server: {status_text}")]
    UpstreamStatus {
        status: u16,
        status_text: String,
        body: Option<String>,
    },

    /// Network/transport failure talking to the backend.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The backend response body was not valid JSON.
    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    /// The target base URL and path do not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Malformed operation schema (startup, fatal).
    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Unsupported file format. Use YAML or JSON.")]
    UnsupportedFormat { path: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    SpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    SpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// `$ref` resolution and other document-level problems.
    #[error("OpenAPI error: {0}")]
    OpenApi(String),
}

impl OpenApiToolsError {
    /// True when the error was raised while resolving tool input (nothing was dispatched).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, OpenApiToolsError::Validation(_))
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
