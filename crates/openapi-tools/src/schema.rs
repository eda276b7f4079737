//! Operation -> MCP tool input schema translation and argument validation.

use crate::error::{OpenApiToolsError, Result};
use crate::operation::Operation;
use jsonschema::Validator;
use serde_json::{Map, Value, json};
use std::fmt;

/// Input field carrying the request body.
pub const BODY_FIELD: &str = "body";
/// Input field carrying custom request headers.
pub const HEADERS_FIELD: &str = "headers";

/// One named input field with its compiled validator.
pub struct FieldSchema {
    name: String,
    schema: Value,
    required: bool,
    /// Also accept a string holding a JSON document that satisfies the schema.
    accepts_json_string: bool,
    validator: Validator,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("required", &self.required)
            .field("accepts_json_string", &self.accepts_json_string)
            .finish_non_exhaustive()
    }
}

impl FieldSchema {
    fn compile(
        operation_id: &str,
        name: &str,
        schema: Value,
        required: bool,
        accepts_json_string: bool,
    ) -> Result<Self> {
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            OpenApiToolsError::Translation(format!(
                "invalid schema for field '{name}' of operation '{operation_id}': {e}"
            ))
        })?;
        Ok(Self {
            name: name.to_string(),
            schema,
            required,
            accepts_json_string,
            validator,
        })
    }

    /// The request-body gate of an operation: accepts a matching value or a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Translation`] when the schema fails to compile.
    pub fn request_body(operation_id: &str, schema: Value) -> Result<Self> {
        Self::compile(operation_id, BODY_FIELD, schema, false, true)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Check a value against the field, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns the violation message when the value does not satisfy the schema.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        let first_error = match self.validator.iter_errors(value).next() {
            None => return Ok(()),
            Some(e) => e.to_string(),
        };

        if self.accepts_json_string
            && let Value::String(raw) = value
            && let Ok(parsed) = serde_json::from_str::<Value>(raw)
            && self.validator.is_valid(&parsed)
        {
            return Ok(());
        }

        Err(first_error)
    }

    /// The schema advertised to MCP clients.
    fn advertised_schema(&self) -> Value {
        if self.accepts_json_string {
            json!({
                "anyOf": [
                    self.schema,
                    {"type": "string", "description": "JSON-encoded request body"}
                ]
            })
        } else {
            self.schema.clone()
        }
    }
}

/// The ordered set of input fields of one operation.
#[derive(Debug)]
pub struct InputSchema {
    fields: Vec<FieldSchema>,
}

impl InputSchema {
    /// Translate an operation into its input fields.
    ///
    /// Declared parameters are required fields keyed by name, the declared body is the
    /// optional `body` field, and custom request header names are optional string members of
    /// the optional `headers` object.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Translation`] when any field schema fails to compile.
    pub fn translate(operation: &Operation) -> Result<Self> {
        let id = operation.operation_id.as_str();
        let mut fields: Vec<FieldSchema> = Vec::new();

        for param in &operation.parameters {
            let field = FieldSchema::compile(id, &param.name, param.schema.clone(), true, false)?;
            if let Some(existing) = fields.iter_mut().find(|f| f.name == param.name) {
                tracing::warn!(
                    operation = id,
                    field = %param.name,
                    "parameter name declared in more than one location; last declaration wins"
                );
                *existing = field;
            } else {
                fields.push(field);
            }
        }

        if let Some(body) = &operation.request_body {
            if fields.iter().any(|f| f.name == BODY_FIELD) {
                tracing::warn!(operation = id, "parameter named 'body' shadows the request body field");
            } else {
                fields.push(FieldSchema::request_body(id, body.schema.clone())?);
            }
        }

        if !operation.headers.request.is_empty() {
            if fields.iter().any(|f| f.name == HEADERS_FIELD) {
                tracing::warn!(operation = id, "parameter named 'headers' shadows the headers field");
            } else {
                let properties: Map<String, Value> = operation
                    .headers
                    .request
                    .iter()
                    .map(|h| (h.clone(), json!({"type": "string"})))
                    .collect();
                let schema = json!({
                    "type": "object",
                    "description": "Custom request headers",
                    "properties": properties,
                });
                fields.push(FieldSchema::compile(id, HEADERS_FIELD, schema, false, false)?);
            }
        }

        Ok(Self { fields })
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Full JSON Schema of the tool input (`type: object`, `properties`, `required`).
    #[must_use]
    pub fn to_json_schema(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.advertised_schema());
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), Value::String("object".into()));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        schema
    }

    /// Validate invocation arguments: required fields present, present fields valid. A `null`
    /// value counts as absent. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Validation`] describing the first offending field.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            match arguments.get(&field.name).filter(|v| !v.is_null()) {
                None if field.required => {
                    return Err(OpenApiToolsError::Validation(format!(
                        "Missing required argument: {}",
                        field.name
                    )));
                }
                None => {}
                Some(value) => field.check(value).map_err(|e| {
                    OpenApiToolsError::Validation(format!(
                        "Invalid argument '{}': {e}",
                        field.name
                    ))
                })?,
            }
        }
        Ok(())
    }
}
