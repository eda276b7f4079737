//! Immutable operation descriptors produced by the loader.

use reqwest::Method;
use serde_json::Value;
use std::fmt;

/// Where a declared parameter goes in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared parameter: name, location and JSON Schema (already merged with the
/// parameter envelope, `$ref`s inlined).
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub name: String,
    pub location: ParamLocation,
    pub schema: Value,
}

impl ParameterSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, location: ParamLocation, schema: Value) -> Self {
        Self {
            name: name.into(),
            location,
            schema,
        }
    }
}

/// The selected media type of a declared request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodySchema {
    pub content_type: String,
    pub required: bool,
    pub schema: Value,
}

/// Custom header names declared for an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderNames {
    pub request: Vec<String>,
    pub response: Vec<String>,
}

/// One HTTP-method-bound endpoint of the API description.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Tool identity (`operationId`, or a canonical `method_path` name).
    pub operation_id: String,
    pub summary: Option<String>,
    pub description: String,
    pub method: Method,
    /// Path template, e.g. `/pets/{petId}`.
    pub path: String,
    pub parameters: Vec<ParameterSchema>,
    pub request_body: Option<RequestBodySchema>,
    pub headers: HeaderNames,
}

impl Operation {
    /// Create a bodyless operation with no parameters; the remaining fields are public and
    /// can be filled in directly.
    #[must_use]
    pub fn new(operation_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            operation_id: operation_id.into(),
            summary: None,
            description: format!("Calls {} {}", method.as_str(), path),
            method,
            path,
            parameters: Vec::new(),
            request_body: None,
            headers: HeaderNames::default(),
        }
    }

    pub fn parameters_in(&self, location: ParamLocation) -> impl Iterator<Item = &ParameterSchema> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.request_body.as_ref().map(|b| b.content_type.as_str())
    }
}
