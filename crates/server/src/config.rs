//! Command-line configuration.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Expose an `OpenAPI`-described HTTP API as MCP tools over HTTP+SSE
#[derive(Parser, Debug, Clone)]
#[command(name = "openapi-mcp", version, about, long_about = None)]
pub struct Config {
    /// Path to the OpenAPI document (.yaml, .yml or .json)
    #[arg(short = 's', long = "spec", env = "OPENAPI_MCP_SPEC")]
    pub spec: PathBuf,

    /// Base URL of the API that tool calls are proxied to
    #[arg(
        short = 't',
        long = "target",
        env = "OPENAPI_MCP_TARGET",
        default_value = "http://localhost:8080"
    )]
    pub target: String,

    /// Port to listen on
    #[arg(short = 'p', long = "port", env = "OPENAPI_MCP_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Log filter directive; `RUST_LOG` takes precedence
    #[arg(long, env = "OPENAPI_MCP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
