//! `OpenAPI` document loading and operation extraction.

use crate::error::{OpenApiToolsError, Result};
use crate::operation::{HeaderNames, Operation, ParamLocation, ParameterSchema, RequestBodySchema};
use crate::resolver::{DocId, RefResolver};
use openapiv3::{
    Content, OpenAPI, Parameter, ParameterData, ParameterSchemaOrContent, PathItem,
    ReferenceOr, RequestBody, Response,
};
use regex::Regex;
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static PATH_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"));

const JSON_MEDIA_TYPE: &str = "application/json";

/// Read and parse an `OpenAPI` file (`.yaml`, `.yml` or `.json`).
///
/// # Errors
///
/// Returns an error for unsupported extensions, unreadable files and documents that do not
/// parse as `OpenAPI` 3.
pub fn load_openapi_file(path: impl AsRef<Path>) -> Result<OpenAPI> {
    let path = path.as_ref();
    let location = path.display().to_string();

    if !has_supported_extension(path) {
        return Err(OpenApiToolsError::UnsupportedFormat { path: location });
    }

    tracing::info!("Loading OpenAPI spec from {location}");
    let content =
        std::fs::read_to_string(path).map_err(|source| OpenApiToolsError::SpecReadFile {
            path: location.clone(),
            source,
        })?;

    // JSON is a valid subset of YAML, so serde_yaml alone is enough.
    serde_yaml::from_str(&content)
        .map_err(|source| OpenApiToolsError::SpecParse { location, source })
}

/// Load a spec file and extract all of its operations.
///
/// # Errors
///
/// See [`load_openapi_file`] and [`extract_operations`].
pub fn load_operations(path: impl AsRef<Path>) -> Result<Vec<Operation>> {
    let path = path.as_ref();
    let spec = load_openapi_file(path)?;
    let root = DocId::parse(&path.display().to_string())?;
    extract_operations(&spec, root)
}

fn has_supported_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

/// Extract every operation of the document, in path order and then method order
/// (get, put, post, delete, options, head, patch, trace).
///
/// # Errors
///
/// Returns an error if a `$ref` cannot be resolved or a parameter is malformed.
pub fn extract_operations(spec: &OpenAPI, root: DocId) -> Result<Vec<Operation>> {
    let resolver = RefResolver::new(root, spec)?;
    let mut operations = Vec::new();

    for (path, item) in &spec.paths.paths {
        let (path_doc, item): (DocId, PathItem) =
            resolver.resolve(resolver.root_doc(), item)?;

        let methods = [
            (Method::GET, &item.get),
            (Method::PUT, &item.put),
            (Method::POST, &item.post),
            (Method::DELETE, &item.delete),
            (Method::OPTIONS, &item.options),
            (Method::HEAD, &item.head),
            (Method::PATCH, &item.patch),
            (Method::TRACE, &item.trace),
        ];

        for (method, op) in methods {
            let Some(op) = op else { continue };
            let operation = build_operation(&resolver, &path_doc, path, method, &item, op)?;
            operations.push(operation);
        }
    }

    tracing::debug!("Extracted {} operations", operations.len());
    Ok(operations)
}

fn build_operation(
    resolver: &RefResolver,
    doc: &DocId,
    path: &str,
    method: Method,
    item: &PathItem,
    op: &openapiv3::Operation,
) -> Result<Operation> {
    let operation_id = op
        .operation_id
        .clone()
        .unwrap_or_else(|| generate_canonical_name(method.as_str(), path));

    let context = format!("{} {}", method.as_str(), path);
    let merged = merge_parameters(resolver, doc, &item.parameters, &op.parameters)?;

    let mut parameters = Vec::with_capacity(merged.len());
    for (param_doc, param) in &merged {
        if let Some(p) = extract_parameter(resolver, param_doc, param, &context)? {
            parameters.push(p);
        }
    }

    let request_body = match &op.request_body {
        Some(body_ref) => {
            let (body_doc, body) = resolver.resolve(doc, body_ref)?;
            extract_request_body(resolver, &body_doc, &body)?
        }
        None => None,
    };

    let responses = resolve_responses(resolver, doc, op)?;
    let headers = collect_header_names(&parameters, request_body.as_ref(), &responses);

    let description = op
        .description
        .clone()
        .or_else(|| op.summary.clone())
        .unwrap_or_else(|| format!("Calls {context}"));

    Ok(Operation {
        operation_id,
        summary: op.summary.clone(),
        description,
        method,
        path: path.to_string(),
        parameters,
        request_body,
        headers,
    })
}

/// Path-item parameters first, then operation parameters; an operation parameter replaces a
/// path-item parameter with the same name and location.
fn merge_parameters(
    resolver: &RefResolver,
    current_doc: &DocId,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> Result<Vec<(DocId, Parameter)>> {
    fn key_for(p: &Parameter) -> (&'static str, String) {
        match p {
            Parameter::Path { parameter_data, .. } => ("path", parameter_data.name.clone()),
            Parameter::Query { parameter_data, .. } => ("query", parameter_data.name.clone()),
            Parameter::Header { parameter_data, .. } => ("header", parameter_data.name.clone()),
            Parameter::Cookie { parameter_data, .. } => ("cookie", parameter_data.name.clone()),
        }
    }

    let mut merged: Vec<(DocId, Parameter)> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params) {
        let (doc, rp) = resolver.resolve(current_doc, p)?;
        let k = key_for(&rp);
        if let Some(i) = index.get(&k).copied() {
            merged[i] = (doc, rp);
        } else {
            index.insert(k, merged.len());
            merged.push((doc, rp));
        }
    }

    Ok(merged)
}

fn extract_parameter(
    resolver: &RefResolver,
    doc: &DocId,
    param: &Parameter,
    context: &str,
) -> Result<Option<ParameterSchema>> {
    let (data, location) = match param {
        Parameter::Path { parameter_data, .. } => (parameter_data, ParamLocation::Path),
        Parameter::Query { parameter_data, .. } => (parameter_data, ParamLocation::Query),
        Parameter::Header { parameter_data, .. } => (parameter_data, ParamLocation::Header),
        Parameter::Cookie { parameter_data, .. } => {
            tracing::warn!(
                parameter = %parameter_data.name,
                operation = %context,
                "cookie parameters are not supported; skipping"
            );
            return Ok(None);
        }
    };

    if data.name.is_empty() {
        return Err(OpenApiToolsError::Translation(format!(
            "{location} parameter without a name in {context}"
        )));
    }

    let schema = parameter_schema(resolver, doc, data)?;
    Ok(Some(ParameterSchema::new(data.name.clone(), location, schema)))
}

/// The parameter's value schema merged with its envelope; schema keywords win.
fn parameter_schema(resolver: &RefResolver, doc: &DocId, data: &ParameterData) -> Result<Value> {
    let mut schema = match &data.format {
        ParameterSchemaOrContent::Schema(s) => schema_json(resolver, doc, s)?,
        ParameterSchemaOrContent::Content(content) => match first_schema(content) {
            Some(s) => schema_json(resolver, doc, s)?,
            None => json!({"type": "string"}),
        },
    };

    if let Some(obj) = schema.as_object_mut() {
        if let Some(desc) = &data.description {
            obj.entry("description")
                .or_insert_with(|| Value::String(desc.clone()));
        }
        if data.deprecated == Some(true) {
            obj.entry("deprecated").or_insert(Value::Bool(true));
        }
    }

    Ok(schema)
}

fn extract_request_body(
    resolver: &RefResolver,
    doc: &DocId,
    body: &RequestBody,
) -> Result<Option<RequestBodySchema>> {
    let selected = body
        .content
        .get_key_value(JSON_MEDIA_TYPE)
        .or_else(|| body.content.iter().next());

    let Some((content_type, media)) = selected else {
        return Ok(None);
    };
    let Some(schema_ref) = media.schema.as_ref() else {
        return Ok(None);
    };

    let mut schema = schema_json(resolver, doc, schema_ref)?;
    if let (Some(desc), Some(obj)) = (&body.description, schema.as_object_mut()) {
        obj.entry("description")
            .or_insert_with(|| Value::String(desc.clone()));
    }

    Ok(Some(RequestBodySchema {
        content_type: content_type.clone(),
        required: body.required,
        schema,
    }))
}

fn resolve_responses(
    resolver: &RefResolver,
    doc: &DocId,
    op: &openapiv3::Operation,
) -> Result<Vec<Response>> {
    op.responses
        .default
        .iter()
        .chain(op.responses.responses.values())
        .map(|r| resolver.resolve(doc, r).map(|(_, resp)| resp))
        .collect()
}

/// Request: header parameters, `Content-Type` with a body, `Accept` when a response has
/// content. Response: declared response headers, `Content-Type` when a response has content.
fn collect_header_names(
    parameters: &[ParameterSchema],
    request_body: Option<&RequestBodySchema>,
    responses: &[Response],
) -> HeaderNames {
    let responds_with_content = responses.iter().any(|r| !r.content.is_empty());

    let mut request: Vec<String> = Vec::new();
    for p in parameters.iter().filter(|p| p.location == ParamLocation::Header) {
        push_header(&mut request, &p.name);
    }
    if request_body.is_some() {
        push_header(&mut request, "Content-Type");
    }
    if responds_with_content {
        push_header(&mut request, "Accept");
    }

    let mut response: Vec<String> = Vec::new();
    for r in responses {
        for name in r.headers.keys() {
            push_header(&mut response, name);
        }
    }
    if responds_with_content {
        push_header(&mut response, "Content-Type");
    }

    HeaderNames { request, response }
}

fn push_header(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        names.push(name.to_string());
    }
}

fn first_schema(content: &Content) -> Option<&ReferenceOr<openapiv3::Schema>> {
    content
        .get(JSON_MEDIA_TYPE)
        .or_else(|| content.values().next())
        .and_then(|m| m.schema.as_ref())
}

fn schema_json(
    resolver: &RefResolver,
    doc: &DocId,
    schema: &ReferenceOr<openapiv3::Schema>,
) -> Result<Value> {
    let raw = serde_json::to_value(schema)
        .map_err(|e| OpenApiToolsError::Translation(format!("unserializable schema: {e}")))?;
    resolver.inline_schema(doc, &raw)
}

/// Generate a canonical tool name from method and path, e.g. `get_pet_petId`.
fn generate_canonical_name(method: &str, path: &str) -> String {
    let name = format!("{}_{}", method.to_lowercase(), path);
    let name = PATH_PARAM_RE.replace_all(&name, "_$1");
    let name = NON_ALNUM_RE.replace_all(&name, "_");
    let mut name = name.trim_matches('_').to_string();
    name.truncate(64);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn operations(yaml: &str) -> Vec<Operation> {
        let spec: OpenAPI = serde_yaml::from_str(yaml).unwrap();
        extract_operations(&spec, DocId::Inline).unwrap()
    }

    #[test]
    fn test_generate_canonical_name() {
        assert_eq!(
            generate_canonical_name("GET", "/pet/{petId}"),
            "get_pet_petId"
        );
        assert_eq!(
            generate_canonical_name("POST", "/store/order"),
            "post_store_order"
        );
        assert_eq!(
            generate_canonical_name("get", "/user/{username}/repos"),
            "get_user_username_repos"
        );
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let err = load_openapi_file("test.txt").unwrap_err();
        assert!(matches!(err, OpenApiToolsError::UnsupportedFormat { .. }));
        assert_eq!(err.to_string(), "Unsupported file format. Use YAML or JSON.");
    }

    #[test]
    fn test_extracts_all_methods_in_order() {
        let ops = operations(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /pet:
    post:
      operationId: addPet
      responses: { "200": { description: ok } }
    get:
      operationId: listPets
      responses: { "200": { description: ok } }
  /user:
    delete:
      responses: { "204": { description: gone } }
"#,
        );

        let ids: Vec<&str> = ops.iter().map(|o| o.operation_id.as_str()).collect();
        assert_eq!(ids, ["listPets", "addPet", "delete_user"]);
        assert_eq!(ops[2].method, Method::DELETE);
        assert_eq!(ops[2].description, "Calls DELETE /user");
    }

    #[test]
    fn test_handles_empty_paths() {
        let ops = operations(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths: {}
"#,
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_resolves_parameter_ref_and_merges_envelope() {
        let ops = operations(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
components:
  parameters:
    Status:
      name: status
      in: query
      required: true
      description: Pet status
      schema:
        type: string
        enum: [available, sold]
paths:
  /pets/{petId}:
    parameters:
      - name: petId
        in: path
        required: true
        schema: { type: integer }
    get:
      operationId: getPet
      parameters:
        - $ref: '#/components/parameters/Status'
        - name: petId
          in: path
          required: true
          schema: { type: string }
      responses: { "200": { description: ok } }
"#,
        );

        let op = &ops[0];
        assert_eq!(op.parameters.len(), 2);
        let pet_id = &op.parameters[0];
        assert_eq!(pet_id.name, "petId");
        assert_eq!(pet_id.location, ParamLocation::Path);
        // Operation-level declaration replaces the path-item one.
        assert_eq!(pet_id.schema["type"], json!("string"));

        let status = &op.parameters[1];
        assert_eq!(status.location, ParamLocation::Query);
        assert_eq!(status.schema["description"], json!("Pet status"));
        assert_eq!(status.schema["enum"], json!(["available", "sold"]));
    }

    #[test]
    fn test_request_body_and_header_names() {
        let ops = operations(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
components:
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: { type: string }
paths:
  /pets:
    post:
      operationId: addPet
      parameters:
        - name: X-Request-Id
          in: header
          required: true
          schema: { type: string }
        - name: session
          in: cookie
          schema: { type: string }
      requestBody:
        required: true
        content:
          application/xml:
            schema: { type: string }
          application/json:
            schema: { $ref: '#/components/schemas/Pet' }
      responses:
        "200":
          description: ok
          headers:
            X-Rate-Limit:
              schema: { type: integer }
          content:
            application/json:
              schema: { $ref: '#/components/schemas/Pet' }
"#,
        );

        let op = &ops[0];
        // Cookie parameters are skipped.
        assert_eq!(op.parameters.len(), 1);

        let body = op.request_body.as_ref().expect("request body");
        assert_eq!(body.content_type, "application/json");
        assert!(body.required);
        assert_eq!(body.schema["required"], json!(["name"]));
        assert_eq!(op.content_type(), Some("application/json"));

        assert_eq!(
            op.headers.request,
            ["X-Request-Id", "Content-Type", "Accept"]
        );
        assert_eq!(op.headers.response, ["X-Rate-Limit", "Content-Type"]);
    }

    #[test]
    fn test_body_without_schema_is_not_declared() {
        let ops = operations(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /upload:
    put:
      operationId: upload
      requestBody:
        content:
          application/octet-stream: {}
      responses: { "204": { description: ok } }
"#,
        );
        assert!(ops[0].request_body.is_none());
        assert!(ops[0].headers.request.is_empty());
    }

    #[test]
    fn test_loads_file_with_external_ref() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("common.yaml"),
            r"
Limit:
  name: limit
  in: query
  required: true
  schema: { type: integer, minimum: 1 }
",
        )
        .unwrap();
        let spec_path = dir.path().join("openapi.yaml");
        fs::write(
            &spec_path,
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /pets:
    get:
      operationId: listPets
      parameters:
        - $ref: './common.yaml#/Limit'
      responses: { "200": { description: ok } }
"#,
        )
        .unwrap();

        let ops = load_operations(&spec_path).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].parameters[0].name, "limit");
        assert_eq!(ops[0].parameters[0].schema["minimum"], json!(1));
    }

    #[test]
    fn test_unparseable_file_reports_location() {
        let dir = tempdir().unwrap();
        let spec_path = dir.path().join("broken.json");
        fs::write(&spec_path, "{ not: [valid").unwrap();

        let err = load_openapi_file(&spec_path).unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecParse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
