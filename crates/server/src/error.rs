//! Error types for the MCP server.

use openapi_mcp_tools::error::OpenApiToolsError;
use thiserror::Error;

/// Main error type for the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Unknown or missing session, misuse of the session lifecycle
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failures (start, close, message delivery)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Attaching a transport to the MCP server failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// Loading or translating the API description
    #[error(transparent)]
    Tools(#[from] OpenApiToolsError),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
