//! Line-based merging for plain text files such as `.gitignore`,
//! `.npmignore` and `.editorconfig`.

/// Union of the lines of several documents.
///
/// The first document is kept verbatim. Each following document contributes
/// the non-blank lines that are not already present, in their original
/// order. The result always ends with a newline.
pub fn merge_lines<S: AsRef<str>>(documents: &[S]) -> String {
    let mut merged: Vec<&str> = Vec::new();
    for (index, document) in documents.iter().enumerate() {
        let document = document.as_ref();
        if index == 0 {
            merged.extend(document.lines());
            continue;
        }
        let mut added = false;
        for line in document.lines() {
            if line.trim().is_empty() || merged.iter().any(|seen| seen.trim_end() == line.trim_end()) {
                continue;
            }
            if !added && merged.last().is_some_and(|last| !last.trim().is_empty()) {
                merged.push("");
            }
            added = true;
            merged.push(line);
        }
    }

    let mut content = merged.join("\n");
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content
}
