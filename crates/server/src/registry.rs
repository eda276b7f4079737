//! Tool registry: one MCP tool per API operation, served through `rmcp::ServerHandler`.

use crate::error::Result;
use openapi_mcp_tools::loader::load_operations;
use openapi_mcp_tools::operation::Operation;
use openapi_mcp_tools::proxy::OperationProxy;
use openapi_mcp_tools::schema::InputSchema;
use reqwest::Method;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, Implementation, JsonObject,
    ListToolsResult, PaginatedRequestParams, ServerCapabilities, ServerInfo, ServerNotification,
    Tool, ToolAnnotations,
};
use rmcp::ServerHandler;
use rmcp::service::{Peer, RequestContext, RoleServer};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const SERVER_NAME: &str = "MCP Server";
pub const SERVER_VERSION: &str = "1.0.0";

/// Everything needed to list and invoke one tool.
#[derive(Debug)]
pub struct ToolDefinition {
    pub tool: Tool,
    pub input: InputSchema,
    pub proxy: OperationProxy,
}

/// Build the tool for one operation.
///
/// # Errors
///
/// Returns an error if any of the operation's schemas fails to compile.
pub fn tool_definition(
    base_url: &str,
    client: &reqwest::Client,
    operation: Operation,
) -> Result<ToolDefinition> {
    let input = InputSchema::translate(&operation)?;

    let mut tool = Tool::new(
        operation.operation_id.clone(),
        operation.description.clone(),
        Arc::new(input.to_json_schema()),
    );
    tool.annotations = Some(annotations_for(&operation));

    let proxy = OperationProxy::new(base_url, client.clone(), Arc::new(operation))?;

    Ok(ToolDefinition { tool, input, proxy })
}

/// MCP tool hints derived from HTTP method semantics. Every tool talks to an external system,
/// so `openWorldHint` is always set.
fn annotations_for(operation: &Operation) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match operation.method {
        Method::GET | Method::HEAD | Method::OPTIONS => (Some(true), Some(false), Some(true)),
        Method::POST => (Some(false), Some(false), Some(false)),
        Method::PUT | Method::DELETE => (Some(false), Some(true), Some(true)),
        // PATCH may or may not be idempotent.
        Method::PATCH => (Some(false), Some(true), None),
        _ => (None, None, None),
    };

    ToolAnnotations {
        title: operation.summary.clone(),
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}

/// All registered tools, keyed (and therefore listed) by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<BTreeMap<String, Arc<ToolDefinition>>>,
}

impl ToolRegistry {
    /// Register one tool per operation, in order. A later operation with the same identity
    /// replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Fails on the first operation whose schemas do not compile; nothing is registered.
    pub fn from_operations(
        base_url: &str,
        client: &reqwest::Client,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for operation in operations {
            let definition = tool_definition(base_url, client, operation)?;
            let name = definition.tool.name.to_string();
            if tools.insert(name.clone(), Arc::new(definition)).is_some() {
                tracing::warn!(tool = %name, "duplicate operation id; last registration wins");
            }
        }

        tracing::debug!("Registered {} tools", tools.len());
        Ok(Self {
            tools: Arc::new(tools),
        })
    }

    /// Load an `OpenAPI` file and register all of its operations against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or any operation fails to translate.
    pub fn from_spec_file(path: &Path, base_url: &str) -> Result<Self> {
        let operations = load_operations(path)?;
        Self::from_operations(base_url, &reqwest::Client::new(), operations)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.tools.get(name)
    }

    /// The MCP `Tool`s, sorted by name.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|d| d.tool.clone()).collect()
    }

    /// Validate and execute one tool call. When a `peer` is given, a logging notification
    /// announcing the call is sent to it without waiting for delivery.
    ///
    /// Unknown tools and invalid arguments are protocol errors; failures of the call itself
    /// are reported in the result with `isError: true`.
    async fn invoke(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        peer: Option<&Peer<RoleServer>>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let definition = self.resolve(name, arguments.as_ref())?;

        if let Some(peer) = peer
            && let Some(notification) = calling_notification(name, arguments.as_ref())
        {
            let peer = peer.clone();
            tokio::spawn(async move {
                if let Err(e) = peer.send_notification(notification).await {
                    tracing::debug!(error = %e, "failed to send logging notification");
                }
            });
        }

        tracing::info!(tool = %name, "calling tool");
        let arguments = arguments.unwrap_or_default();
        Ok(Self::dispatch(&definition, &arguments).await)
    }

    fn resolve(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
    ) -> std::result::Result<Arc<ToolDefinition>, ErrorData> {
        let definition = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ErrorData::invalid_params(format!("Tool {name} not found"), None))?;

        let empty = JsonObject::new();
        definition
            .input
            .validate(arguments.unwrap_or(&empty))
            .map_err(|e| {
                ErrorData::invalid_params(
                    format!("Invalid arguments for tool {name}: {e}"),
                    None,
                )
            })?;

        Ok(definition)
    }

    async fn dispatch(definition: &ToolDefinition, arguments: &JsonObject) -> CallToolResult {
        let name = &definition.tool.name;
        match definition.proxy.call(arguments).await {
            Ok(body) => {
                let text = serde_json::to_string(&body).unwrap_or_else(|_| body.to_string());
                CallToolResult::success(vec![Content::text(text)])
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        }
    }
}

/// `notifications/message` at level info announcing a tool call.
fn calling_notification(name: &str, arguments: Option<&JsonObject>) -> Option<ServerNotification> {
    let params = arguments.map_or_else(|| "{}".to_string(), |a| Value::Object(a.clone()).to_string());
    serde_json::from_value(json!({
        "method": "notifications/message",
        "params": {
            "level": "info",
            "data": format!("calling {name} with params: {params}"),
        },
    }))
    .ok()
}

impl ServerHandler for ToolRegistry {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.tools(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.invoke(&request.name, request.arguments, Some(&context.peer))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapi_mcp_test_support::MockApi;
    use openapi_mcp_tools::operation::{
        HeaderNames, ParamLocation, ParameterSchema, RequestBodySchema,
    };

    fn get_pet() -> Operation {
        let mut op = Operation::new("getPet", Method::GET, "/pets/{petId}");
        op.summary = Some("Find pet by ID".into());
        op.parameters = vec![ParameterSchema::new(
            "petId",
            ParamLocation::Path,
            json!({"type": "string"}),
        )];
        op
    }

    fn add_owner_pet() -> Operation {
        let mut op = Operation::new("addOwnerPet", Method::POST, "/owners/{ownerId}/pets");
        op.parameters = vec![
            ParameterSchema::new("ownerId", ParamLocation::Path, json!({"type": "string"})),
            ParameterSchema::new("dryRun", ParamLocation::Query, json!({"type": "boolean"})),
            ParameterSchema::new(
                "X-Request-Id",
                ParamLocation::Header,
                json!({"type": "string"}),
            ),
        ];
        op.request_body = Some(RequestBodySchema {
            content_type: "application/json".into(),
            required: true,
            schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {"name": {"type": "string"}}
            }),
        });
        op.headers = HeaderNames {
            request: vec!["X-Request-Id".into(), "X-Trace".into()],
            response: vec![],
        };
        op
    }

    fn args(value: Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    #[test]
    fn annotations_follow_method_semantics() {
        let a = annotations_for(&get_pet());
        assert_eq!(a.title.as_deref(), Some("Find pet by ID"));
        assert_eq!(a.read_only_hint, Some(true));
        assert_eq!(a.destructive_hint, Some(false));
        assert_eq!(a.open_world_hint, Some(true));

        let patch = annotations_for(&Operation::new("p", Method::PATCH, "/p"));
        assert_eq!(patch.destructive_hint, Some(true));
        assert_eq!(patch.idempotent_hint, None);

        let custom: Method = "PROPFIND".parse().expect("valid method token");
        let other = annotations_for(&Operation::new("x", custom, "/x"));
        assert_eq!(other.read_only_hint, None);
        assert_eq!(other.open_world_hint, Some(true));
    }

    #[test]
    fn tools_are_sorted_and_duplicates_replace() {
        let client = reqwest::Client::new();
        let mut first = Operation::new("zeta", Method::GET, "/z");
        first.description = "first".into();
        let mut second = Operation::new("zeta", Method::POST, "/z");
        second.description = "second".into();

        let registry = ToolRegistry::from_operations(
            "http://localhost:8080",
            &client,
            [first, Operation::new("alpha", Method::GET, "/a"), second],
        )
        .unwrap();

        let tools = registry.tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(tools[1].description.as_deref(), Some("second"));
        assert_eq!(
            tools[0].input_schema.get("type"),
            Some(&Value::String("object".into()))
        );
    }

    #[test]
    fn malformed_schema_registers_nothing() {
        let mut broken = Operation::new("broken", Method::GET, "/b");
        broken.parameters = vec![ParameterSchema::new(
            "q",
            ParamLocation::Query,
            json!({"type": 12}),
        )];

        let result = ToolRegistry::from_operations(
            "http://localhost:8080",
            &reqwest::Client::new(),
            [get_pet(), broken],
        );
        assert!(result.is_err());
    }

    #[test]
    fn server_info_identifies_the_server() {
        let info = ToolRegistry::default().get_info();
        assert_eq!(info.server_info.name, SERVER_NAME);
        assert_eq!(info.server_info.version, SERVER_VERSION);
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.logging.is_some());
    }

    #[test]
    fn calling_notification_is_a_logging_message() {
        let n = calling_notification("getPet", args(json!({"petId": "1"})).as_ref())
            .expect("notification");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["method"], "notifications/message");
        assert_eq!(v["params"]["level"], "info");
        assert_eq!(
            v["params"]["data"],
            r#"calling getPet with params: {"petId":"1"}"#
        );
    }

    #[tokio::test]
    async fn invoke_proxies_and_reports_errors() {
        let api = MockApi::echo().await.unwrap();
        let registry =
            ToolRegistry::from_operations(&api.base_url(), &reqwest::Client::new(), [get_pet()])
                .unwrap();

        let err = registry.invoke("nope", None, None).await.unwrap_err();
        assert_eq!(err.code, ErrorData::invalid_params("", None).code);

        let err = registry.invoke("getPet", args(json!({})), None).await.unwrap_err();
        assert!(err.message.contains("petId"));
        assert_eq!(api.request_count(), 0);

        let ok = registry
            .invoke("getPet", args(json!({"petId": "7"})), None)
            .await
            .unwrap();
        assert_ne!(ok.is_error, Some(true));
        let v = serde_json::to_value(&ok).unwrap();
        let text = v["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["path"], "/pets/7");

        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn upstream_failure_is_a_tool_error() {
        let api = MockApi::text(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
            .await
            .unwrap();
        let registry =
            ToolRegistry::from_operations(&api.base_url(), &reqwest::Client::new(), [get_pet()])
                .unwrap();

        let result = registry
            .invoke("getPet", args(json!({"petId": "7"})), None)
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(
            v["content"][0]["text"],
            "Failed to fetch from API server: Internal Server Error"
        );
        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invoke_sends_exactly_the_resolved_request() {
        let api = MockApi::echo().await.unwrap();
        let registry = ToolRegistry::from_operations(
            &api.base_url(),
            &reqwest::Client::new(),
            [add_owner_pet()],
        )
        .unwrap();

        let result = registry
            .invoke(
                "addOwnerPet",
                args(json!({
                    "ownerId": "o 1",
                    "dryRun": true,
                    "X-Request-Id": "req-1",
                    "headers": {"x-trace": "abc"},
                    "body": {"name": "Rex"}
                })),
                None,
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        let sent = &requests[0];
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.path, "/owners/o%201/pets");
        assert_eq!(sent.query.as_deref(), Some("dryRun=true"));
        assert_eq!(sent.header("X-Request-Id"), Some("req-1"));
        assert_eq!(sent.header("X-Trace"), Some("abc"));
        assert_eq!(sent.header("Content-Type"), Some("application/json"));
        assert_eq!(sent.header("Accept"), Some("application/json"));
        assert_eq!(sent.body, r#"{"name":"Rex"}"#);

        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn null_body_is_sent_as_no_body() {
        let api = MockApi::echo().await.unwrap();
        let registry = ToolRegistry::from_operations(
            &api.base_url(),
            &reqwest::Client::new(),
            [add_owner_pet()],
        )
        .unwrap();

        let result = registry
            .invoke(
                "addOwnerPet",
                args(json!({
                    "ownerId": "o1",
                    "dryRun": false,
                    "X-Request-Id": "req-2",
                    "body": null
                })),
                None,
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body, "");

        api.shutdown().await.unwrap();
    }
}
