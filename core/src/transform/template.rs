//! Template mapping semantics.
//!
//! The working copy starts as the client arguments (when they are an object)
//! and each rule rewrites one backend parameter. Sources are read from the
//! original arguments, so rule order cannot change the outcome; deletions
//! apply to the working copy only.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::ParameterMapping;

pub(crate) fn apply_template(
    client_args: Option<&Map<String, Value>>,
    mappings: &BTreeMap<String, ParameterMapping>,
) -> Map<String, Value> {
    let original = client_args.cloned().unwrap_or_default();
    let mut working = original.clone();

    for (backend_param, pm) in mappings {
        match pm {
            ParameterMapping::Passthrough { source, .. }
            | ParameterMapping::Rename { source, .. } => {
                if let Some(value) = original.get(source) {
                    working.insert(backend_param.clone(), value.clone());
                    // The source is consumed only when it is renamed.
                    if backend_param != source {
                        working.remove(source);
                    }
                }
            }
            ParameterMapping::Constant { value } => {
                working.insert(backend_param.clone(), value.clone());
            }
            ParameterMapping::Default {
                source,
                default_value,
                ..
            } => match original.get(source) {
                Some(value) => {
                    working.insert(backend_param.clone(), value.clone());
                    if backend_param != source {
                        working.remove(source);
                    }
                }
                None => {
                    working.insert(backend_param.clone(), default_value.clone());
                }
            },
            ParameterMapping::Omit {} => {
                working.remove(backend_param);
            }
        }
    }

    working
}
