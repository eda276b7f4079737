//! Tool invocation -> one outbound HTTP request.

use crate::error::{OpenApiToolsError, Result};
use crate::operation::{Operation, ParamLocation};
use crate::schema::{BODY_FIELD, FieldSchema, HEADERS_FIELD};
use regex::Regex;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use url::Url;

static PATH_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));

const JSON_MEDIA_TYPE: &str = "application/json";

/// Everything needed to dispatch one call, resolved before any I/O.
#[derive(Debug)]
struct RequestParts {
    url: Url,
    headers: HeaderMap,
    body: Option<String>,
}

/// Proxies invocations of one operation to the backend API.
#[derive(Debug, Clone)]
pub struct OperationProxy {
    base_url: String,
    client: reqwest::Client,
    operation: Arc<Operation>,
    body_gate: Option<Arc<FieldSchema>>,
}

impl OperationProxy {
    /// Create a proxy for `operation` against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Translation`] if the request body schema fails to compile.
    pub fn new(
        base_url: impl Into<String>,
        client: reqwest::Client,
        operation: Arc<Operation>,
    ) -> Result<Self> {
        let body_gate = operation
            .request_body
            .as_ref()
            .map(|b| FieldSchema::request_body(&operation.operation_id, b.schema.clone()))
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            base_url: base_url.into(),
            client,
            operation,
            body_gate,
        })
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Resolve the invocation into a request, dispatch it, and return the parsed JSON response.
    ///
    /// Input problems are reported before anything is sent.
    ///
    /// # Errors
    ///
    /// - [`OpenApiToolsError::Validation`] for missing/invalid parameters or an invalid body.
    /// - [`OpenApiToolsError::UpstreamStatus`] when the backend answers non-2xx.
    /// - [`OpenApiToolsError::Request`] / [`OpenApiToolsError::Decode`] for network and
    ///   response parsing failures.
    pub async fn call(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let parts = self.build_request_parts(arguments)?;
        let method = self.operation.method.clone();

        tracing::debug!(
            operation = %self.operation.operation_id,
            method = %method,
            url = %parts.url,
            "dispatching request"
        );

        let url = parts.url.to_string();
        let mut request = self.client.request(method.clone(), parts.url).headers(parts.headers);
        if let Some(body) = parts.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            tracing::error!(
                status = status.as_u16(),
                status_text = %status_text,
                body = body.as_deref().unwrap_or(""),
                url = %url,
                method = %method,
                "API request failed"
            );
            return Err(OpenApiToolsError::UpstreamStatus {
                status: status.as_u16(),
                status_text,
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn build_request_parts(&self, arguments: &Map<String, Value>) -> Result<RequestParts> {
        let op = &*self.operation;

        let path = self.resolve_path(arguments)?;

        let mut query: Vec<(String, String)> = Vec::new();
        for param in op.parameters_in(ParamLocation::Query) {
            let value = present(arguments, &param.name).ok_or_else(|| {
                OpenApiToolsError::Validation(format!("Missing query parameter: {}", param.name))
            })?;
            match value {
                Value::Array(items) => query.extend(
                    items
                        .iter()
                        .map(|v| (param.name.clone(), value_to_string(v))),
                ),
                other => query.push((param.name.clone(), value_to_string(other))),
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));

        for param in op.parameters_in(ParamLocation::Header) {
            let value = present(arguments, &param.name).ok_or_else(|| {
                OpenApiToolsError::Validation(format!("Missing header parameter: {}", param.name))
            })?;
            insert_header(&mut headers, &param.name, &value_to_string(value))?;
        }

        if let Some(Value::Object(custom)) = arguments.get(HEADERS_FIELD) {
            for name in &op.headers.request {
                let value = custom
                    .get(name)
                    .or_else(|| {
                        custom
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(name))
                            .map(|(_, v)| v)
                    })
                    .filter(|v| !v.is_null());
                if let Some(value) = value {
                    insert_header(&mut headers, name, &value_to_string(value))?;
                }
            }
        }

        let body = self.resolve_body(arguments)?;
        let url = self.build_url(&path, &query)?;

        Ok(RequestParts { url, headers, body })
    }

    fn resolve_path(&self, arguments: &Map<String, Value>) -> Result<String> {
        let op = &*self.operation;
        let mut error = None;

        let path = PATH_PLACEHOLDER_RE.replace_all(&op.path, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            if error.is_some() {
                return String::new();
            }
            if !op.parameters_in(ParamLocation::Path).any(|p| p.name == name) {
                error = Some(format!("Invalid path parameter: {name}"));
                return String::new();
            }
            match present(arguments, name) {
                Some(value) => encode_uri_component(&value_to_string(value)),
                None => {
                    error = Some(format!("Missing path parameter: {name}"));
                    String::new()
                }
            }
        });

        match error {
            Some(msg) => Err(OpenApiToolsError::Validation(msg)),
            None => Ok(path.into_owned()),
        }
    }

    fn resolve_body(&self, arguments: &Map<String, Value>) -> Result<Option<String>> {
        if matches!(self.operation.method, Method::GET | Method::DELETE) {
            return Ok(None);
        }
        let Some(gate) = &self.body_gate else {
            return Ok(None);
        };
        let Some(value) = present(arguments, BODY_FIELD) else {
            return Ok(None);
        };

        gate.check(value)
            .map_err(|e| OpenApiToolsError::Validation(format!("Invalid request body: {e}")))?;

        Ok(Some(match value {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }))
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&url).map_err(|e| OpenApiToolsError::InvalidUrl(e.to_string()))?;

        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish();
            url.set_query(Some(&encoded));
        }

        Ok(url)
    }
}

fn present<'a>(arguments: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    arguments.get(name).filter(|v| !v.is_null())
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| OpenApiToolsError::Validation(format!("Invalid header name: {name}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| OpenApiToolsError::Validation(format!("Invalid value for header: {name}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Percent-encode like `encodeURIComponent`: keep ALPHA, DIGIT and `-_.!~*'()`.
fn encode_uri_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}
