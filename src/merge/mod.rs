//! Merge operations for files that several repositories contribute.
//!
//! When two or more repositories carry the same root file and the chosen
//! collision strategy is `merge`, the contents are combined here:
//!
//! - JSON (json.rs) - deep merge, arrays combined as a union
//! - Everything else (lines.rs) - union of lines
//!
//! The JSON module also provides the key-path navigation the plan builder
//! uses to edit nested fields of the root manifest.

pub mod json;
pub mod lines;

use crate::error::Result;

/// Whether a file is merged as JSON, judged by its name.
pub fn is_json_file(relative_path: &str) -> bool {
    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    file_name.ends_with(".json")
        || matches!(file_name, ".babelrc" | ".eslintrc" | ".prettierrc" | ".swcrc")
}

/// Merge the contents of one file as contributed by several repositories.
///
/// `contributions` pairs the contributing repository with the file content,
/// in merge order.
pub fn merge_contents(relative_path: &str, contributions: &[(String, String)]) -> Result<String> {
    if is_json_file(relative_path) {
        return json::merge_json_documents(contributions);
    }
    let documents: Vec<&str> = contributions.iter().map(|(_, c)| c.as_str()).collect();
    Ok(lines::merge_lines(&documents))
}
