//! # Version Specifier Classification
//!
//! Every dependency version found in a `package.json` is a raw string that may
//! be a semver range (`^4.17.21`, `>=1.2.0 <2`), a reference to something that
//! is not a registry version at all (`git+https://…`, `file:../lib`,
//! `workspace:*`), or a wildcard (`*`, `1.x`).
//!
//! This module classifies those strings and provides the total order the rest
//! of the pipeline relies on when it has to pick a "highest" or "lowest"
//! version.
//!
//! ## Precision
//!
//! Ranges are approximated by their first (lower) bound: `^1.2.3 || ^2.0.0`
//! is treated as `1.2.3`. That is enough to classify conflicts by
//! major/minor/patch and is deliberately not a range solver.
//!
//! ## Ordering
//!
//! - Any parseable version sorts above any non-parseable one, so an
//!   unparseable specifier never wins a "highest" pick by accident.
//! - A release sorts above a pre-release of the same `major.minor.patch`.
//! - Two pre-releases compare their tags lexically (`beta.10 < beta.9`).
//! - Two non-parseable specifiers fall back to comparing the raw strings.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Prerelease, Version, VersionReq};
use serde::{Deserialize, Serialize};

static TRIPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:-([0-9A-Za-z.-]+))?").expect("valid regex")
});

static WILDCARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\^~=v]*(\d+)\.(?:[xX*](?:\.[xX*\d]+)?|\d+\.[xX*])$").expect("valid regex")
});

static GITHUB_SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][\w.-]*/[\w.-]+(?:#.*)?$").expect("valid regex")
});

/// What a non-registry reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Git,
    File,
    Link,
    Alias,
    Url,
    Workspace,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Git => "git",
            ReferenceKind::File => "file",
            ReferenceKind::Link => "link",
            ReferenceKind::Alias => "alias",
            ReferenceKind::Url => "url",
            ReferenceKind::Workspace => "workspace",
        }
    }
}

/// The classification of a raw specifier string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecifierKind {
    /// A semver version or range whose lower bound parsed.
    Semver,
    /// A git/file/url/workspace/alias reference.
    Reference(ReferenceKind),
    /// `*`, `x`, `latest`, `1.x`, `1.2.x` and friends.
    Wildcard,
    /// Looked like a version but did not parse.
    Unparsed,
}

/// A classified dependency specifier. Never mutated after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpecifier {
    /// The string exactly as it appeared in the manifest.
    pub raw: String,
    pub kind: SpecifierKind,
    /// Lower bound of the range, when `kind` is `Semver`.
    pub parsed: Option<Version>,
}

impl VersionSpecifier {
    pub fn is_semver(&self) -> bool {
        self.kind == SpecifierKind::Semver
    }
}

/// Classify a raw specifier string.
pub fn classify(raw: &str) -> VersionSpecifier {
    let trimmed = raw.trim();
    let kind_only = |kind| VersionSpecifier {
        raw: raw.to_string(),
        kind,
        parsed: None,
    };

    if let Some(reference) = reference_kind(trimmed) {
        return kind_only(SpecifierKind::Reference(reference));
    }
    if is_wildcard(trimmed) {
        return kind_only(SpecifierKind::Wildcard);
    }

    match lower_bound(trimmed) {
        Some(version) => VersionSpecifier {
            raw: raw.to_string(),
            kind: SpecifierKind::Semver,
            parsed: Some(version),
        },
        None => kind_only(SpecifierKind::Unparsed),
    }
}

fn reference_kind(spec: &str) -> Option<ReferenceKind> {
    const PREFIXES: &[(&str, ReferenceKind)] = &[
        ("git+", ReferenceKind::Git),
        ("git:", ReferenceKind::Git),
        ("github:", ReferenceKind::Git),
        ("gitlab:", ReferenceKind::Git),
        ("bitbucket:", ReferenceKind::Git),
        ("file:", ReferenceKind::File),
        ("link:", ReferenceKind::Link),
        ("npm:", ReferenceKind::Alias),
        ("http://", ReferenceKind::Url),
        ("https://", ReferenceKind::Url),
        ("workspace:", ReferenceKind::Workspace),
    ];

    for (prefix, kind) in PREFIXES {
        if spec.starts_with(prefix) {
            return Some(*kind);
        }
    }
    if GITHUB_SHORTHAND.is_match(spec) {
        return Some(ReferenceKind::Git);
    }
    None
}

fn is_wildcard(spec: &str) -> bool {
    matches!(spec, "" | "*" | "x" | "X" | "latest") || WILDCARD.is_match(spec)
}

/// Extract the lower bound of a range as a `Version`.
///
/// Takes the first `||` alternative, strips range operators and a leading
/// `v`, then parses the first dotted triple. Missing minor/patch become 0.
pub fn lower_bound(spec: &str) -> Option<Version> {
    let first_alternative = spec.split("||").next()?.trim();
    let stripped = first_alternative.trim_start_matches(['^', '~', '=', '>', '<', ' ']);
    let token = stripped.split_whitespace().next()?;
    let token = token.strip_prefix('v').unwrap_or(token);

    let captures = TRIPLE.captures(token)?;
    let number = |idx: usize| -> Option<u64> {
        match captures.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let mut version = Version::new(number(1)?, number(2)?, number(3)?);
    if let Some(pre) = captures.get(4) {
        version.pre = Prerelease::new(pre.as_str()).ok()?;
    }
    Some(version)
}

/// Total order over specifiers used for highest/lowest selection.
pub fn compare(a: &VersionSpecifier, b: &VersionSpecifier) -> Ordering {
    match (&a.parsed, &b.parsed) {
        (Some(left), Some(right)) => compare_versions(left, right),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        // Degraded precision: neither side is a version.
        (None, None) => a.raw.cmp(&b.raw),
    }
}

/// Compare two raw specifier strings.
pub fn compare_raw(a: &str, b: &str) -> Ordering {
    compare(&classify(a), &classify(b))
}

fn compare_versions(left: &Version, right: &Version) -> Ordering {
    left.major
        .cmp(&right.major)
        .then(left.minor.cmp(&right.minor))
        .then(left.patch.cmp(&right.patch))
        .then_with(|| match (left.pre.is_empty(), right.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => left.pre.as_str().cmp(right.pre.as_str()),
        })
}

/// Check whether `version` satisfies an npm-style `range`.
///
/// Returns `None` when the range cannot be interpreted (references, garbage),
/// so callers can tell "unsatisfied" apart from "unknown".
pub fn satisfies(range: &str, version: &Version) -> Option<bool> {
    let trimmed = range.trim();
    if matches!(trimmed, "" | "*" | "x" | "X" | "latest") {
        return Some(true);
    }
    if reference_kind(trimmed).is_some() {
        return None;
    }

    let mut understood = false;
    for alternative in trimmed.split("||") {
        let Some(req) = to_version_req(alternative.trim()) else {
            continue;
        };
        understood = true;
        if req.matches(version) {
            return Some(true);
        }
    }

    if understood { Some(false) } else { None }
}

/// Translate one npm range alternative into a `semver::VersionReq`.
fn to_version_req(alternative: &str) -> Option<VersionReq> {
    if let Some((low, high)) = alternative.split_once(" - ") {
        let low = low.trim().trim_start_matches('v');
        let high = high.trim().trim_start_matches('v');
        return VersionReq::parse(&format!(">={}, <={}", low, high)).ok();
    }

    // ">= 1.2.0 < 2" → [">=1.2.0", "<2"]
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending_op.push_str(token);
            continue;
        }
        let token = format!("{}{}", pending_op, token);
        pending_op.clear();
        comparators.push(normalize_comparator(&token));
    }

    if comparators.is_empty() {
        return None;
    }
    VersionReq::parse(&comparators.join(", ")).ok()
}

/// npm reads a bare version as an exact match; `semver` reads it as caret.
fn normalize_comparator(token: &str) -> String {
    let op_len = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '^' | '~'))
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(op_len);
    let rest = rest.strip_prefix('v').unwrap_or(rest);
    let op = if op.is_empty() && !rest.contains(['x', 'X', '*']) {
        "="
    } else {
        op
    };
    format!("{}{}", op, rest)
}
