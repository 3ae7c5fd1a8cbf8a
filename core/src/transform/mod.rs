//! Declarative argument mapping: client arguments -> backend arguments.
//!
//! A mapping is either a `template` (per-parameter rules) or a `jsonata`
//! expression producing the whole backend argument object. Both forms are
//! data, stored in the groups config, and validated structurally before use.

mod schema;
mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{GatewayError, GatewayResult},
    jsonata::Expression,
};

pub use schema::client_input_schema;

/// How a single backend parameter is sourced from the client arguments.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum ParameterMapping {
    Passthrough {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Constant {
        value: Value,
    },
    Default {
        source: String,
        #[serde(rename = "default")]
        default_value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Rename {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Omit {},
}

impl ParameterMapping {
    /// Client parameter this mapping reads from, when it reads one.
    pub fn source(&self) -> Option<&str> {
        match self {
            ParameterMapping::Passthrough { source, .. }
            | ParameterMapping::Default { source, .. }
            | ParameterMapping::Rename { source, .. } => Some(source),
            ParameterMapping::Constant { .. } | ParameterMapping::Omit {} => None,
        }
    }

    /// Agent-visible name override, when the mapping carries one.
    pub fn name_override(&self) -> Option<&str> {
        match self {
            ParameterMapping::Passthrough { name, .. }
            | ParameterMapping::Default { name, .. }
            | ParameterMapping::Rename { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    pub fn description_override(&self) -> Option<&str> {
        match self {
            ParameterMapping::Passthrough { description, .. }
            | ParameterMapping::Default { description, .. }
            | ParameterMapping::Rename { description, .. } => description.as_deref(),
            _ => None,
        }
    }
}

/// Full argument mapping for one tool.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum ArgumentMapping {
    Template {
        mappings: BTreeMap<String, ParameterMapping>,
    },
    Jsonata {
        expression: String,
    },
}

/// Structural validation result.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Result of a dry-run transform, for mapping authors.
#[derive(Debug, Clone)]
pub struct TransformTest {
    pub success: bool,
    pub output: Option<Map<String, Value>>,
    pub error: Option<String>,
}

/// Apply a mapping to the client arguments, producing the backend arguments.
pub fn transform(
    client_args: Option<&Map<String, Value>>,
    mapping: &ArgumentMapping,
) -> GatewayResult<Map<String, Value>> {
    match mapping {
        ArgumentMapping::Template { mappings } => {
            Ok(template::apply_template(client_args, mappings))
        }
        ArgumentMapping::Jsonata { expression } => {
            let expr = Expression::compile(expression)
                .map_err(|e| GatewayError::Mapping(format!("jsonata: {e}")))?;
            let input = client_args
                .cloned()
                .map(Value::Object)
                .unwrap_or_else(|| Value::Object(Map::new()));
            let result = expr
                .evaluate(&input)
                .map_err(|e| GatewayError::Mapping(format!("jsonata: {e}")))?;
            match result {
                Some(Value::Object(map)) => Ok(map),
                _ => Err(GatewayError::Mapping(
                    "expression must return an object".into(),
                )),
            }
        }
    }
}

/// Inspect a mapping without applying it.
pub fn validate(mapping: &ArgumentMapping) -> MappingValidation {
    let mut errors = Vec::new();
    match mapping {
        ArgumentMapping::Template { mappings } => {
            for (backend_param, pm) in mappings {
                if backend_param.trim().is_empty() {
                    errors.push("backend parameter name must not be empty".to_string());
                }
                if let Some(source) = pm.source() {
                    if source.trim().is_empty() {
                        errors.push(format!(
                            "mapping for '{backend_param}' has an empty source"
                        ));
                    }
                }
            }
        }
        ArgumentMapping::Jsonata { expression } => {
            if let Err(e) = Expression::compile(expression) {
                errors.push(format!("invalid jsonata expression: {e}"));
            }
        }
    }
    MappingValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// Non-throwing transform variant.
pub fn test_transform(
    client_args: Option<&Map<String, Value>>,
    mapping: &ArgumentMapping,
) -> TransformTest {
    match transform(client_args, mapping) {
        Ok(output) => TransformTest {
            success: true,
            output: Some(output),
            error: None,
        },
        Err(e) => TransformTest {
            success: false,
            output: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parameter_mapping_serde_tags() {
        let json = r#"{"type": "default", "source": "timezone", "default": "UTC"}"#;
        let pm: ParameterMapping = serde_json::from_str(json).unwrap();
        match &pm {
            ParameterMapping::Default {
                source,
                default_value,
                ..
            } => {
                assert_eq!(source, "timezone");
                assert_eq!(default_value, &json!("UTC"));
            }
            other => panic!("unexpected variant {other:?}"),
        }
        let back = serde_json::to_value(&pm).unwrap();
        assert_eq!(back["type"], json!("default"));
        assert_eq!(back["default"], json!("UTC"));
    }

    #[test]
    fn test_unknown_mapping_type_is_hard_error() {
        let json = r#"{"type": "wildcard", "source": "x"}"#;
        assert!(serde_json::from_str::<ParameterMapping>(json).is_err());
    }

    #[test]
    fn test_jsonata_transform_returns_object() {
        let mapping = ArgumentMapping::Jsonata {
            expression: r#"{ "stats": { "total": $sum(numbers), "count": $count(numbers) } }"#
                .to_string(),
        };
        let input = args(json!({"numbers": [10, 20, 30]}));
        let out = transform(Some(&input), &mapping).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"stats": {"total": 60, "count": 3}})
        );
    }

    #[test]
    fn test_jsonata_non_object_result_is_mapping_error() {
        let mapping = ArgumentMapping::Jsonata {
            expression: "$sum(numbers)".to_string(),
        };
        let input = args(json!({"numbers": [1]}));
        let err = transform(Some(&input), &mapping).unwrap_err();
        assert!(matches!(err, GatewayError::Mapping(_)));
        assert!(err.to_string().contains("must return an object"));
    }

    #[test]
    fn test_validate_template() {
        let mapping = ArgumentMapping::Template {
            mappings: BTreeMap::from([
                (
                    "".to_string(),
                    ParameterMapping::Constant { value: json!(1) },
                ),
                (
                    "q".to_string(),
                    ParameterMapping::Passthrough {
                        source: " ".to_string(),
                        name: None,
                        description: None,
                    },
                ),
            ]),
        };
        let report = validate(&mapping);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_validate_jsonata_syntax() {
        let bad = ArgumentMapping::Jsonata {
            expression: "{ broken".to_string(),
        };
        assert!(!validate(&bad).valid);

        let good = ArgumentMapping::Jsonata {
            expression: "{ \"a\": 1 }".to_string(),
        };
        assert!(validate(&good).valid);
    }

    #[test]
    fn test_test_transform_does_not_throw() {
        let mapping = ArgumentMapping::Jsonata {
            expression: "42".to_string(),
        };
        let outcome = test_transform(None, &mapping);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("object"));

        let mapping = ArgumentMapping::Template {
            mappings: BTreeMap::new(),
        };
        let outcome = test_transform(Some(&args(json!({"a": 1}))), &mapping);
        assert!(outcome.success);
        assert_eq!(outcome.output.unwrap().get("a"), Some(&json!(1)));
    }
}
