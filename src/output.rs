//! # Output Rendering
//!
//! Human-readable rendering of analysis and verification results, with
//! color and emoji support based on terminal capabilities and user
//! preferences.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals

use std::env;
use std::fmt::Write;

use console::style;

use crate::conflicts::{ConflictRecord, Severity};
use crate::phases::analyze::AnalysisReport;
use crate::phases::verify::{CheckStatus, VerifyResult};

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// `color_flag` is the value of `--color`: `always` forces colors on
    /// (overriding `NO_COLOR`), `never` forces them off, and `auto` detects
    /// them from the environment and the terminal.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // The presence of the variable (even if empty) disables colors
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    /// Create a configuration with colors always enabled.
    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Create a configuration with colors always disabled.
    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// The emoji when colors are enabled, the plain text otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color { emoji_str } else { plain }
}

/// Marker printed in front of a verification check.
pub fn status_marker(config: &OutputConfig, status: CheckStatus) -> String {
    let (icon, plain) = match status {
        CheckStatus::Pass => ("✅", "[PASS]"),
        CheckStatus::Warn => ("⚠️ ", "[WARN]"),
        CheckStatus::Fail => ("❌", "[FAIL]"),
    };
    emoji(config, icon, plain).to_string()
}

fn severity_label(config: &OutputConfig, severity: Severity) -> String {
    let label = match severity {
        Severity::Minor => "minor",
        Severity::Major => "major",
        Severity::Incompatible => "incompatible",
    };
    if !config.use_color {
        return label.to_string();
    }
    match severity {
        Severity::Minor => style(label).dim().to_string(),
        Severity::Major => style(label).yellow().to_string(),
        Severity::Incompatible => style(label).red().bold().to_string(),
    }
}

fn heading(config: &OutputConfig, text: &str) -> String {
    if config.use_color {
        style(text).bold().to_string()
    } else {
        text.to_string()
    }
}

fn conflict_line(config: &OutputConfig, record: &ConflictRecord) -> String {
    let uses: Vec<String> = record
        .versions
        .iter()
        .map(|v| format!("{} ({})", v.specifier, v.package))
        .collect();
    format!(
        "  {} [{}] {}",
        record.name,
        severity_label(config, record.severity),
        uses.join(", ")
    )
}

/// Render an analysis for the terminal.
pub fn render_analysis(config: &OutputConfig, report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} packages, complexity {}/100",
        emoji(config, "📦", "[ANALYSIS]"),
        report.packages.len(),
        report.complexity_score
    );

    let sections: [(&str, &[ConflictRecord]); 3] = [
        ("Declared conflicts", report.conflicts.declared.as_slice()),
        ("Resolved conflicts", report.conflicts.resolved.as_slice()),
        ("Peer conflicts", report.conflicts.peer.as_slice()),
    ];
    for (title, records) in sections {
        if records.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{} ({})", heading(config, title), records.len());
        for record in records {
            let _ = writeln!(out, "{}", conflict_line(config, record));
        }
    }

    if !report.conflicts.decisions.is_empty() {
        let _ = writeln!(out, "\n{}", heading(config, "Decisions needed"));
        for decision in &report.conflicts.decisions {
            let _ = writeln!(out, "  - {}", decision.description);
            let _ = writeln!(out, "    {}", decision.suggested_action);
        }
    }

    if !report.cycles.is_empty() {
        let _ = writeln!(out, "\n{} ({})", heading(config, "Cycles"), report.cycles.len());
        for cycle in &report.cycles {
            let mut nodes = cycle.nodes.clone();
            if let Some(first) = cycle.nodes.first() {
                nodes.push(first.clone());
            }
            let _ = writeln!(out, "  {}", nodes.join(" -> "));
        }
    }

    if !report.hotspots.is_empty() {
        let _ = writeln!(out, "\n{}", heading(config, "Hotspots"));
        for hotspot in report.hotspots.iter().take(5) {
            let _ = writeln!(
                out,
                "  {} used by {}{}",
                hotspot.name,
                hotspot.dependents,
                if hotspot.has_conflict { " (conflicted)" } else { "" }
            );
        }
    }

    if !report.collisions.is_empty() {
        let _ = writeln!(out, "\n{}", heading(config, "Root file collisions"));
        for collision in &report.collisions {
            let _ = writeln!(
                out,
                "  {} in {} -> {}",
                collision.path,
                collision.repos.join(", "),
                collision.suggested
            );
        }
    }

    if !report.conflicts.warnings.is_empty() {
        let _ = writeln!(
            out,
            "\n{} {} non-registry or wildcard specifiers",
            emoji(config, "ℹ️ ", "[INFO]"),
            report.conflicts.warnings.len()
        );
    }
    out
}

/// Render a verification result for the terminal.
pub fn render_verify(config: &OutputConfig, result: &VerifyResult) -> String {
    let mut out = String::new();
    for check in &result.checks {
        let _ = writeln!(
            out,
            "{} {} - {}",
            status_marker(config, check.status),
            check.id,
            check.message
        );
    }
    let _ = writeln!(
        out,
        "\n{} tier: {} passed, {} warnings, {} failed",
        result.tier, result.summary.pass, result.summary.warn, result.summary.fail
    );
    out
}
