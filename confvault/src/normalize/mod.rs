//! Configuration normalizer
//!
//! Strips volatile content (timestamps, banners, counters) from raw device
//! configuration before it is stored or compared. Rules are declared as data
//! per platform and compiled once; [`normalize`] itself is pure and never fails.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::RuleError;
use crate::models::device::Platform;

/// Token substituted for masked content when a rule declares no replacement
pub const MASK_TOKEN: &str = "<masked>";

/// Upper bound on rewrite passes that do not shrink the line
const MAX_PASSES: usize = 4;

/// What a volatile rule does to a matching line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatileAction {
    /// Remove the whole line
    #[default]
    Drop,

    /// Replace the matched region
    Mask,
}

/// Declarative volatile-content rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatileRule {
    /// Regular expression matched against each line
    pub pattern: String,

    #[serde(default)]
    pub action: VolatileAction,

    /// Replacement for `mask` rules; supports `$1`-style group references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl VolatileRule {
    pub fn drop(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            action: VolatileAction::Drop,
            replacement: None,
        }
    }

    pub fn mask(pattern: &str, replacement: Option<&str>) -> Self {
        Self {
            pattern: pattern.to_string(),
            action: VolatileAction::Mask,
            replacement: replacement.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledMask {
    regex: Regex,
    replacement: String,
}

/// Compiled volatile rules for one platform
#[derive(Debug, Clone, Default)]
pub struct PlatformRules {
    drops: Vec<Regex>,
    masks: Vec<CompiledMask>,
}

impl PlatformRules {
    /// Compile rule data, failing on the first invalid pattern
    pub fn compile(rules: &[VolatileRule]) -> Result<Self, RuleError> {
        let mut compiled = Self::default();
        for rule in rules {
            let regex = Regex::new(&rule.pattern).map_err(|e| RuleError::InvalidPattern {
                tag: format!("volatile:{:?}", rule.action).to_lowercase(),
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
            match rule.action {
                VolatileAction::Drop => compiled.drops.push(regex),
                VolatileAction::Mask => compiled.masks.push(CompiledMask {
                    regex,
                    replacement: rule
                        .replacement
                        .clone()
                        .unwrap_or_else(|| MASK_TOKEN.to_string()),
                }),
            }
        }
        Ok(compiled)
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.drops.len() + self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drops_line(&self, line: &str) -> bool {
        self.drops.iter().any(|re| re.is_match(line))
    }

    fn mask_line(&self, line: &str) -> String {
        let mut out = line.to_string();
        for mask in &self.masks {
            out = mask
                .regex
                .replace_all(&out, mask.replacement.as_str())
                .into_owned();
        }
        out
    }

    /// Rewrite one line to a fixpoint, or `None` if it is dropped.
    ///
    /// Passes that shorten the line always continue, so stacked trailing
    /// markers are all removed. Passes that keep or grow the length count
    /// against `MAX_PASSES`.
    fn rewrite(&self, line: &str) -> Option<String> {
        let mut current = line.trim_end().to_string();
        let mut passes = 0;
        loop {
            if current.is_empty() || self.drops_line(&current) {
                return None;
            }
            let next = self.mask_line(&current).trim_end().to_string();
            if next == current {
                return Some(current);
            }
            if next.len() >= current.len() {
                passes += 1;
                if passes >= MAX_PASSES {
                    current = next;
                    break;
                }
            }
            current = next;
        }
        if current.is_empty() || self.drops_line(&current) {
            None
        } else {
            Some(current)
        }
    }
}

/// Built-in volatile rules for a platform
pub fn default_rules(platform: Platform) -> Vec<VolatileRule> {
    match platform {
        Platform::Ios => vec![
            VolatileRule::drop(r"^!"),
            VolatileRule::drop(r"^Building configuration"),
            VolatileRule::drop(r"^Current configuration\s*:"),
            VolatileRule::drop(r"^ntp clock-period"),
        ],
        Platform::Eos => vec![VolatileRule::drop(r"^!"), VolatileRule::drop(r"^ntp clock-period")],
        Platform::Junos => vec![
            VolatileRule::drop(r"^#"),
            VolatileRule::drop(r"^\s*## Last (commit|changed):"),
            VolatileRule::mask(r"\s*## SECRET-DATA$", Some("")),
        ],
        Platform::Other => vec![VolatileRule::drop(
            r"^\s*[!#]+\s*(Generated|Last configuration change|NVRAM config last updated|Time)\b",
        )],
    }
}

/// Normalize raw configuration text
///
/// Trailing whitespace and blank lines are always removed. Masks that shrink
/// a line are applied until they stop matching, so stripping rules are
/// idempotent however often their pattern repeats. Masks that keep the length
/// must settle within a few passes, which holds for every replacement that
/// does not reintroduce its own pattern.
pub fn normalize(raw: &str, rules: &PlatformRules) -> String {
    raw.lines()
        .filter_map(|line| rules.rewrite(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-platform normalizer built from defaults plus configured extras
#[derive(Debug, Clone)]
pub struct Normalizer {
    by_platform: HashMap<Platform, PlatformRules>,
}

impl Normalizer {
    /// Build from the built-in defaults and additional per-platform rules
    pub fn new(extra: &HashMap<Platform, Vec<VolatileRule>>) -> Result<Self, RuleError> {
        let mut by_platform = HashMap::new();
        for platform in [Platform::Ios, Platform::Junos, Platform::Eos, Platform::Other] {
            let mut rules = default_rules(platform);
            if let Some(more) = extra.get(&platform) {
                rules.extend(more.iter().cloned());
            }
            by_platform.insert(platform, PlatformRules::compile(&rules)?);
        }
        Ok(Self { by_platform })
    }

    /// Normalizer using only the built-in rules
    pub fn with_defaults() -> Self {
        let mut by_platform = HashMap::new();
        for platform in [Platform::Ios, Platform::Junos, Platform::Eos, Platform::Other] {
            // built-in patterns are static and known to compile
            let rules = PlatformRules::compile(&default_rules(platform)).unwrap_or_default();
            by_platform.insert(platform, rules);
        }
        Self { by_platform }
    }

    /// Compiled rules for a platform
    pub fn rules_for(&self, platform: Platform) -> &PlatformRules {
        self.by_platform
            .get(&platform)
            .or_else(|| self.by_platform.get(&Platform::Other))
            .unwrap_or(&EMPTY_RULES)
    }

    /// Normalize text captured from a device of the given platform
    pub fn normalize(&self, platform: Platform, raw: &str) -> String {
        normalize(raw, self.rules_for(platform))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

static EMPTY_RULES: PlatformRules = PlatformRules {
    drops: Vec::new(),
    masks: Vec::new(),
};
