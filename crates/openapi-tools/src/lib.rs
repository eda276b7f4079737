//! OpenAPI -> MCP tooling.
//!
//! Turns an `OpenAPI` 3 document into a list of [`operation::Operation`]s, translates each
//! operation into a validated MCP tool input schema, and proxies tool invocations to the real
//! backend as exactly one HTTP request.
//!
//! This crate contains **no** MCP session or transport logic; see the `openapi-mcp` crate.

pub mod error;
pub mod loader;
pub mod operation;
pub mod proxy;
pub mod resolver;
pub mod schema;
