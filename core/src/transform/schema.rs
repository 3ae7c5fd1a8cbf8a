//! Client-facing input schema derivation.
//!
//! The backend publishes the schema of its own parameters; the mapping
//! determines what the client actually sends. This module reconciles the two
//! so `tools/list` advertises exactly the parameters the client may provide.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::{ArgumentMapping, ParameterMapping};

/// Derive the client-visible input schema for a tool.
///
/// An explicit override schema always wins. Without a mapping (or with an
/// opaque jsonata mapping) the backend schema is returned unchanged. Template
/// mappings synthesize a new object schema: constants and omitted parameters
/// disappear, sourced parameters appear under their client-visible name, and
/// unmapped backend parameters are preserved as-is.
pub fn client_input_schema(
    backend_schema: &Map<String, Value>,
    explicit: Option<&Map<String, Value>>,
    mapping: Option<&ArgumentMapping>,
) -> Map<String, Value> {
    if let Some(schema) = explicit {
        return schema.clone();
    }
    let mappings = match mapping {
        None | Some(ArgumentMapping::Jsonata { .. }) => return backend_schema.clone(),
        Some(ArgumentMapping::Template { mappings }) => mappings,
    };

    let backend_props = backend_schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let backend_required: HashSet<&str> = backend_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut properties = Map::new();
    let mut required = Vec::new();

    for (backend_param, pm) in mappings {
        let Some(source) = pm.source() else {
            // Constants and omitted parameters are invisible to the client.
            continue;
        };
        let client_name = pm.name_override().unwrap_or(source).to_string();
        let mut property = backend_props
            .get(backend_param)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(description) = pm.description_override() {
            property.insert("description".to_string(), json!(description));
        }
        let is_required = match pm {
            ParameterMapping::Default { .. } => false,
            _ => backend_required.contains(backend_param.as_str()),
        };
        if is_required {
            required.push(Value::String(client_name.clone()));
        }
        properties.insert(client_name, Value::Object(property));
    }

    // Backend parameters no mapping touches pass through under their own name.
    for (name, property) in &backend_props {
        if mappings.contains_key(name) || properties.contains_key(name) {
            continue;
        }
        properties.insert(name.clone(), property.clone());
        if backend_required.contains(name.as_str()) {
            required.push(Value::String(name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}
