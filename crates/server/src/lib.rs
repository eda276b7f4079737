//! MCP server exposing the operations of an `OpenAPI` document as tools.
//!
//! Each session gets its own HTTP+SSE transport: clients open `GET /mcp`, receive an
//! `endpoint` event naming `/messages?sessionId=<id>`, and post JSON-RPC messages there.

pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod store;
pub mod transport;

pub use gateway::{Gateway, McpServer, ProtocolServer};
pub use registry::ToolRegistry;
pub use store::TransportStore;
