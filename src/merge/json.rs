//! JSON merge operations
//!
//! Deep merging of JSON documents, used when several repositories contribute
//! the same JSON configuration file (`.eslintrc.json`, `tsconfig.base.json`,
//! `renovate.json`, ...) and when the plan builder edits nested fields of the
//! root manifest.
//!
//! ## Features
//!
//! - Deep merging of JSON objects with recursive descent
//! - Array handling with replace, append or union modes
//! - Key-path navigation that creates missing intermediate objects

use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// How arrays present on both sides of a merge are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    /// The source array replaces the target array.
    Replace,
    /// Source items are appended to the target array.
    Append,
    /// Source items not already present are appended.
    Union,
}

/// Navigate to the object at `path` within `value`, creating intermediate
/// objects as needed.
///
/// # Errors
///
/// Returns `Error::Merge` if a non-object value sits on the path.
pub fn navigate_object<'a>(
    value: &'a mut JsonValue,
    path: &[&str],
) -> Result<&'a mut Map<String, JsonValue>> {
    if value.is_null() {
        *value = JsonValue::Object(Map::new());
    }
    let mut current = match value {
        JsonValue::Object(map) => map,
        _ => {
            return Err(Error::Merge {
                operation: "json navigate".to_string(),
                message: "Expected object at document root".to_string(),
            });
        }
    };

    for key in path {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if entry.is_null() {
            *entry = JsonValue::Object(Map::new());
        }
        current = match entry {
            JsonValue::Object(map) => map,
            _ => {
                return Err(Error::Merge {
                    operation: "json navigate".to_string(),
                    message: format!("Expected object while navigating to '{}'", key),
                });
            }
        };
    }
    Ok(current)
}

/// Recursively merge source JSON value into target
///
/// - Objects: Recursively merge keys, with source values taking precedence for conflicts
/// - Arrays: combined according to `arrays`
/// - Scalars: Replace target with source
pub fn merge_json_values(target: &mut JsonValue, source: &JsonValue, arrays: ArrayMode) {
    match (target, source) {
        (JsonValue::Object(target_map), JsonValue::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_json_values(existing, value, arrays),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (JsonValue::Array(target_array), JsonValue::Array(source_array)) => match arrays {
            ArrayMode::Replace => *target_array = source_array.clone(),
            ArrayMode::Append => target_array.extend(source_array.iter().cloned()),
            ArrayMode::Union => {
                for item in source_array {
                    if !target_array.contains(item) {
                        target_array.push(item.clone());
                    }
                }
            }
        },
        (target, source) => *target = source.clone(),
    }
}

/// Deep-merge several JSON documents in order, later documents winning on
/// scalar conflicts and arrays combined as a union.
///
/// `documents` pairs an origin (used in errors) with the file content.
pub fn merge_json_documents(documents: &[(String, String)]) -> Result<String> {
    let mut merged = JsonValue::Null;
    for (origin, content) in documents {
        let value: JsonValue = serde_json::from_str(content).map_err(|e| Error::Merge {
            operation: "json merge".to_string(),
            message: format!("Failed to parse JSON from {}: {}", origin, e),
        })?;
        if merged.is_null() {
            merged = value;
        } else {
            merge_json_values(&mut merged, &value, ArrayMode::Union);
        }
    }

    let serialized = serde_json::to_string_pretty(&merged).map_err(|e| Error::Merge {
        operation: "json merge".to_string(),
        message: format!("Failed to serialize merged JSON: {}", e),
    })?;
    Ok(ensure_trailing_newline(serialized))
}

fn ensure_trailing_newline(mut content: String) -> String {
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content
}
