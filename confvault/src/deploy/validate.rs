//! Pre-apply checks for a proposed configuration
//!
//! Every check runs against normalized text and produces a
//! [`ValidationResult`]; a job proceeds only when all of them pass.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedChange, Severity};
use crate::errors::RuleError;
use crate::models::device::Platform;
use crate::transport::SimulationReport;

/// Lines longer than this are treated as garbage input
pub const MAX_LINE_LENGTH: usize = 4096;

/// Directives refused unless the operator overrides the list
pub fn default_disallowed_directives() -> Vec<String> {
    vec![
        r"^\s*reload\b".to_string(),
        r"^\s*write\s+erase\b".to_string(),
        r"^\s*erase\s+(startup-config|nvram:)".to_string(),
        r"^\s*format\s+\S+".to_string(),
        r"^\s*request\s+system\s+(reboot|halt|zeroize)\b".to_string(),
    ]
}

/// Result of one named check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    fn pass(check: &str) -> Self {
        Self {
            check: check.to_string(),
            passed: true,
            detail: None,
        }
    }

    fn fail(check: &str, detail: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Compiled disallowed-directive patterns
#[derive(Debug, Clone, Default)]
pub struct DirectiveFilter {
    patterns: Vec<Regex>,
}

impl DirectiveFilter {
    pub fn compile(patterns: &[String]) -> Result<Self, RuleError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| RuleError::InvalidPattern {
                    tag: "disallowed_directive".to_string(),
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// First offending line, if any
    fn offending<'a>(&self, config: &'a str) -> Option<&'a str> {
        config
            .lines()
            .find(|line| self.patterns.iter().any(|p| p.is_match(line)))
    }
}

/// Platform-aware shape check used when the device cannot simulate
pub fn check_structure(platform: Platform, config: &str) -> ValidationResult {
    const CHECK: &str = "structure";

    let Some(first) = config.lines().next() else {
        return ValidationResult::fail(CHECK, "configuration is empty");
    };

    if platform.uses_braces() {
        let mut depth: i64 = 0;
        for (index, line) in config.lines().enumerate() {
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth < 0 {
                    return ValidationResult::fail(
                        CHECK,
                        format!("unmatched '}}' on line {}", index + 1),
                    );
                }
            }
        }
        if depth != 0 {
            return ValidationResult::fail(CHECK, format!("{} unclosed '{{'", depth));
        }
    } else if first.starts_with(char::is_whitespace) {
        return ValidationResult::fail(CHECK, "first line is indented");
    }

    ValidationResult::pass(CHECK)
}

/// Dry-run verdict from the device, falling back to [`check_structure`]
pub fn check_dry_run(
    platform: Platform,
    config: &str,
    simulation: Option<&SimulationReport>,
) -> ValidationResult {
    const CHECK: &str = "dry_run";

    match simulation {
        Some(report) if report.accepted => ValidationResult::pass(CHECK),
        Some(report) => ValidationResult::fail(
            CHECK,
            if report.messages.is_empty() {
                "device rejected the configuration".to_string()
            } else {
                report.messages.join("; ")
            },
        ),
        None => {
            let structural = check_structure(platform, config);
            ValidationResult {
                check: CHECK.to_string(),
                ..structural
            }
        }
    }
}

/// Reject control characters and runaway lines
pub fn check_syntax(config: &str) -> ValidationResult {
    const CHECK: &str = "syntax";

    for (index, line) in config.lines().enumerate() {
        if line.chars().any(|c| c.is_control() && c != '\t') {
            return ValidationResult::fail(
                CHECK,
                format!("control character on line {}", index + 1),
            );
        }
        if line.len() > MAX_LINE_LENGTH {
            return ValidationResult::fail(CHECK, format!("line {} is too long", index + 1));
        }
    }
    ValidationResult::pass(CHECK)
}

pub fn check_directives(config: &str, filter: &DirectiveFilter) -> ValidationResult {
    const CHECK: &str = "disallowed_directives";

    match filter.offending(config) {
        Some(line) => ValidationResult::fail(CHECK, format!("disallowed directive: {}", line.trim())),
        None => ValidationResult::pass(CHECK),
    }
}

/// Block changes whose classified severity reaches the threshold.
///
/// `change` is `None` when there is no prior snapshot or nothing changed.
pub fn check_severity(
    change: Option<&ClassifiedChange>,
    threshold: Option<Severity>,
) -> ValidationResult {
    const CHECK: &str = "severity";

    match (change, threshold) {
        (Some(change), Some(threshold)) if change.severity >= threshold => {
            ValidationResult::fail(
                CHECK,
                format!(
                    "change severity {} reaches blocking threshold {} (tags: {})",
                    change.severity,
                    threshold,
                    change.tags.join(", ")
                ),
            )
        }
        _ => ValidationResult::pass(CHECK),
    }
}
