//! `$ref` resolution for `OpenAPI` documents.
//!
//! `openapiv3` leaves every `ReferenceOr::Reference` unresolved. [`RefResolver`] follows
//! `#/...` pointers inside the root document and relative or `file://` pointers into
//! sibling YAML/JSON files, caching each loaded document. Remote (`http`) refs are rejected.
//!
//! A ref is always relative to the document it appears in, so every lookup carries a [`DocId`].
//! [`RefResolver::inline_schema`] flattens a schema into standalone JSON Schema.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::{OpenAPI, ReferenceOr};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// `OpenAPI` 3.0 keywords that have no JSON Schema meaning.
const OPENAPI_ONLY_KEYWORDS: &[&str] = &["discriminator", "xml", "externalDocs", "example"];

/// Keywords whose values are data, not schemas; never walked for `$ref`s.
const DATA_KEYWORDS: &[&str] = &["enum", "const", "default", "examples"];

/// Keywords whose values map arbitrary names to schemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocId {
    /// A document parsed from memory; relative file refs resolve against the working directory.
    Inline,
    File(PathBuf),
}

impl DocId {
    /// Parse a root spec location into a document identifier.
    ///
    /// # Errors
    ///
    /// Returns an error for `file://` URLs that cannot be converted to a path.
    pub fn parse(spec_location: &str) -> Result<Self> {
        if spec_location.starts_with("file://") {
            let url = Url::parse(spec_location).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid OpenAPI spec file URL '{spec_location}': {e}",
                ))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid file URL (cannot convert to path): {spec_location}",
                ))
            })?;
            Ok(DocId::File(canonicalize_best_effort(path)))
        } else {
            Ok(DocId::File(canonicalize_best_effort(PathBuf::from(
                spec_location,
            ))))
        }
    }

    fn display(&self) -> String {
        match self {
            DocId::Inline => "<inline>".to_string(),
            DocId::File(p) => p.display().to_string(),
        }
    }
}

fn canonicalize_best_effort(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

#[derive(Debug)]
pub struct RefResolver {
    root_doc: DocId,
    docs: RwLock<HashMap<DocId, Arc<Value>>>,
}

impl RefResolver {
    /// Create a new resolver for a root `OpenAPI` document.
    ///
    /// # Errors
    ///
    /// Returns an error if the root spec cannot be converted into JSON for caching.
    pub fn new(root_doc: DocId, spec: &OpenAPI) -> Result<Self> {
        let root_value =
            serde_json::to_value(spec).map_err(|e| OpenApiToolsError::OpenApi(e.to_string()))?;
        let mut docs = HashMap::new();
        docs.insert(root_doc.clone(), Arc::new(root_value));
        Ok(Self {
            root_doc,
            docs: RwLock::new(docs),
        })
    }

    #[must_use]
    pub fn root_doc(&self) -> &DocId {
        &self.root_doc
    }

    /// Resolve a `ReferenceOr<T>` (following chains of refs) into the referenced item and the
    /// document it lives in.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is cyclic, dangling, or does not deserialize as `T`.
    pub fn resolve<T>(&self, current_doc: &DocId, r: &ReferenceOr<T>) -> Result<(DocId, T)>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut doc = current_doc.clone();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok((doc, item)),
                ReferenceOr::Reference { reference } => {
                    let key = Self::canonical_ref_key(&doc, &reference)?;
                    if !seen.insert(key) {
                        return Err(OpenApiToolsError::OpenApi(format!(
                            "Cyclic $ref detected while resolving: {reference}",
                        )));
                    }

                    let (target_doc, value) = self.resolve_ref_value(&doc, &reference)?;
                    let next: ReferenceOr<T> = serde_json::from_value(value).map_err(|e| {
                        OpenApiToolsError::OpenApi(format!(
                            "Failed to deserialize referenced value '{}' (doc {}) as expected type: {}",
                            reference,
                            target_doc.display(),
                            e
                        ))
                    })?;

                    doc = target_doc;
                    cur = next;
                }
            }
        }
    }

    /// Convert an `OpenAPI` schema (as JSON) into a self-contained JSON Schema.
    ///
    /// - `$ref`s are inlined; a recursive reference is cut and replaced by `{}`.
    /// - `nullable: true` becomes a `["<type>", "null"]` type union.
    /// - `OpenAPI`-only keywords are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is dangling or points into an unreadable document.
    pub fn inline_schema(&self, current_doc: &DocId, schema: &Value) -> Result<Value> {
        let mut stack: Vec<String> = Vec::new();
        self.inline_value(current_doc, schema, &mut stack)
    }

    fn inline_value(&self, doc: &DocId, value: &Value, stack: &mut Vec<String>) -> Result<Value> {
        match value {
            Value::Object(obj) => {
                if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
                    return self.inline_ref(doc, reference, obj, stack);
                }

                let mut out = Map::new();
                for (k, v) in obj {
                    if OPENAPI_ONLY_KEYWORDS.contains(&k.as_str()) || k == "nullable" {
                        continue;
                    }
                    let v = if DATA_KEYWORDS.contains(&k.as_str()) {
                        v.clone()
                    } else if let (true, Value::Object(named)) =
                        (SCHEMA_MAP_KEYWORDS.contains(&k.as_str()), v)
                    {
                        // Keys are user-chosen names; only the values are schemas.
                        let mut schemas = Map::new();
                        for (name, s) in named {
                            schemas.insert(name.clone(), self.inline_value(doc, s, stack)?);
                        }
                        Value::Object(schemas)
                    } else {
                        self.inline_value(doc, v, stack)?
                    };
                    out.insert(k.clone(), v);
                }

                if obj.get("nullable").and_then(Value::as_bool) == Some(true)
                    && let Some(Value::String(t)) = out.get("type").cloned()
                {
                    out.insert("type".to_string(), json!([t, "null"]));
                }

                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.inline_value(doc, v, stack))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn inline_ref(
        &self,
        doc: &DocId,
        reference: &str,
        siblings: &Map<String, Value>,
        stack: &mut Vec<String>,
    ) -> Result<Value> {
        let key = Self::canonical_ref_key(doc, reference)?;
        if stack.contains(&key) {
            return Ok(json!({}));
        }

        let (target_doc, target) = self.resolve_ref_value(doc, reference)?;
        stack.push(key);
        let inlined = self.inline_value(&target_doc, &target, stack);
        stack.pop();

        let mut inlined = inlined?;
        // A description next to a `$ref` documents the use site.
        if let (Some(desc), Some(obj)) = (siblings.get("description"), inlined.as_object_mut()) {
            obj.insert("description".to_string(), desc.clone());
        }
        Ok(inlined)
    }

    fn resolve_ref_value(&self, current_doc: &DocId, reference: &str) -> Result<(DocId, Value)> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let doc_value = self.load_doc(&target_doc)?;

        let selected = if let Some(ptr) = pointer {
            doc_value.pointer(&ptr).cloned().ok_or_else(|| {
                OpenApiToolsError::OpenApi(format!(
                    "Unresolved $ref '{}' (doc {}, missing pointer '{}')",
                    reference,
                    target_doc.display(),
                    ptr
                ))
            })?
        } else {
            (*doc_value).clone()
        };

        Ok((target_doc, selected))
    }

    fn parse_ref(current_doc: &DocId, reference: &str) -> Result<(DocId, Option<String>)> {
        let (doc_part, frag_part) = match reference.split_once('#') {
            Some((d, f)) => (d, Some(f)),
            None => (reference, None),
        };

        let target_doc = Self::resolve_doc(current_doc, doc_part)?;

        let ptr = match frag_part {
            Some("") | None => None,
            Some(frag) if frag.starts_with('/') => Some(frag.to_string()),
            Some(_) => {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}",
                )));
            }
        };

        Ok((target_doc, ptr))
    }

    fn resolve_doc(current_doc: &DocId, doc_part: &str) -> Result<DocId> {
        if doc_part.is_empty() {
            return Ok(current_doc.clone());
        }

        if doc_part.starts_with("http://") || doc_part.starts_with("https://") {
            return Err(OpenApiToolsError::OpenApi(format!(
                "Remote $ref documents are not supported: {doc_part}"
            )));
        }

        if doc_part.starts_with("file://") {
            let url = Url::parse(doc_part).map_err(|e| {
                OpenApiToolsError::OpenApi(format!("Bad $ref file URL '{doc_part}': {e}"))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::OpenApi(format!("Bad $ref file URL (not a path): {doc_part}"))
            })?;
            return Ok(DocId::File(canonicalize_best_effort(path)));
        }

        let resolved = if Path::new(doc_part).is_absolute() {
            PathBuf::from(doc_part)
        } else {
            match current_doc {
                DocId::File(base) => base
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(doc_part),
                DocId::Inline => PathBuf::from(doc_part),
            }
        };
        Ok(DocId::File(canonicalize_best_effort(resolved)))
    }

    fn canonical_ref_key(current_doc: &DocId, reference: &str) -> Result<String> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let mut key = match &target_doc {
            DocId::Inline => "inline:".to_string(),
            DocId::File(p) => format!("file:{}", p.display()),
        };
        if let Some(ptr) = pointer {
            key.push('#');
            key.push_str(&ptr);
        }
        Ok(key)
    }

    fn load_doc(&self, doc: &DocId) -> Result<Arc<Value>> {
        if let Some(v) = self.docs.read().get(doc).cloned() {
            return Ok(v);
        }

        let DocId::File(path) = doc else {
            return Err(OpenApiToolsError::OpenApi(
                "Inline root document is not cached".to_string(),
            ));
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            OpenApiToolsError::OpenApi(format!(
                "Failed to read referenced file {}: {e}",
                path.display(),
            ))
        })?;

        let parsed: Value = serde_json::from_str(&content)
            .or_else(|_| serde_yaml::from_str(&content))
            .map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Failed to parse referenced document {}: {e}",
                    doc.display(),
                ))
            })?;

        let parsed = Arc::new(parsed);
        self.docs.write().insert(doc.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }
}
