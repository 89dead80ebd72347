//! Change classification
//!
//! Rules are plain data (`tag`, `pattern`, `scope`, `severity`) evaluated by a
//! single matcher. For each changed line, rules are tried by scope
//! specificity (exact, then keyword, then section) and in declaration order
//! within a scope; the first hit tags the line. A diff's severity is the
//! maximum over its tagged lines, `informational` when nothing matches.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diff::{Diff, DiffOp, OpKind};
use crate::errors::RuleError;

/// Operational risk of a change, totally ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Informational,
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "informational" | "info" => Ok(Severity::Informational),
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// How a rule's pattern is applied to a changed line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Whole (trimmed) line must match
    Exact,

    /// Pattern found anywhere in the line
    Keyword,

    /// Pattern found in one of the line's enclosing section headers
    Section,
}

/// Which side of a change a rule applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTrigger {
    #[default]
    Any,
    Insert,
    Delete,
}

impl RuleTrigger {
    fn accepts(&self, kind: OpKind) -> bool {
        match self {
            RuleTrigger::Any => kind != OpKind::Context,
            RuleTrigger::Insert => kind == OpKind::Insert,
            RuleTrigger::Delete => kind == OpKind::Delete,
        }
    }
}

/// Declarative classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub tag: String,
    pub pattern: String,
    pub scope: RuleScope,
    pub severity: Severity,
    #[serde(default)]
    pub on: RuleTrigger,
}

/// Ordered rule data, loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Compile every pattern, failing on the first one that does not compile
    pub fn compile(&self) -> Result<CompiledRuleSet, RuleError> {
        let mut compiled = CompiledRuleSet::default();
        for rule in &self.rules {
            let source = match rule.scope {
                RuleScope::Exact => format!("^(?:{})$", rule.pattern),
                RuleScope::Keyword | RuleScope::Section => rule.pattern.clone(),
            };
            let regex = Regex::new(&source).map_err(|e| RuleError::InvalidPattern {
                tag: rule.tag.clone(),
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
            let entry = CompiledRule {
                tag: rule.tag.clone(),
                severity: rule.severity,
                on: rule.on,
                regex,
            };
            match rule.scope {
                RuleScope::Exact => compiled.exact.push(entry),
                RuleScope::Keyword => compiled.keyword.push(entry),
                RuleScope::Section => compiled.section.push(entry),
            }
        }
        Ok(compiled)
    }

    /// Compile and classify in one step
    pub fn classify(&self, diff: &Diff) -> Result<ClassifiedChange, RuleError> {
        Ok(classify(diff, &self.compile()?))
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    tag: String,
    severity: Severity,
    on: RuleTrigger,
    regex: Regex,
}

/// Rule set with patterns compiled, grouped by scope
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    exact: Vec<CompiledRule>,
    keyword: Vec<CompiledRule>,
    section: Vec<CompiledRule>,
}

impl CompiledRuleSet {
    pub fn len(&self) -> usize {
        self.exact.len() + self.keyword.len() + self.section.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first_match(&self, op: &DiffOp) -> Option<(&CompiledRule, RuleScope)> {
        let line = op.text.trim();
        let applies = |rule: &&CompiledRule| rule.on.accepts(op.kind);

        if let Some(rule) = self
            .exact
            .iter()
            .filter(applies)
            .find(|r| r.regex.is_match(line))
        {
            return Some((rule, RuleScope::Exact));
        }
        if let Some(rule) = self
            .keyword
            .iter()
            .filter(applies)
            .find(|r| r.regex.is_match(line))
        {
            return Some((rule, RuleScope::Keyword));
        }
        self.section
            .iter()
            .filter(applies)
            .find(|r| op.section.iter().any(|header| r.regex.is_match(header)))
            .map(|rule| (rule, RuleScope::Section))
    }
}

/// Tag assigned to one changed line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    /// Index into `Diff::ops`
    pub op_index: usize,
    pub tag: String,
    pub scope: RuleScope,
    pub severity: Severity,
}

/// A diff together with its severity and matched rule tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedChange {
    pub diff: Diff,
    pub severity: Severity,

    /// Distinct tags in order of first appearance
    pub tags: Vec<String>,

    pub matches: Vec<LineMatch>,
}

/// Classify a diff. Pure: the result depends only on the diff and the rules.
pub fn classify(diff: &Diff, rules: &CompiledRuleSet) -> ClassifiedChange {
    let mut severity = Severity::Informational;
    let mut tags: Vec<String> = Vec::new();
    let mut matches = Vec::new();

    for (index, op) in diff.ops.iter().enumerate() {
        if !op.is_change() {
            continue;
        }
        let Some((rule, scope)) = rules.first_match(op) else {
            continue;
        };
        severity = severity.max(rule.severity);
        if !tags.contains(&rule.tag) {
            tags.push(rule.tag.clone());
        }
        matches.push(LineMatch {
            op_index: index,
            tag: rule.tag.clone(),
            scope,
            severity: rule.severity,
        });
    }

    ClassifiedChange {
        diff: diff.clone(),
        severity,
        tags,
        matches,
    }
}
