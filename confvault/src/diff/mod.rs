//! Line-level snapshot diffing
//!
//! Produces a minimal edit script between two normalized snapshots using
//! Longest Common Subsequence (LCS) alignment. Identical leading and trailing
//! lines are matched up front; the changed middle is aligned with a full LCS
//! table when it fits the configured cell budget, and otherwise compared in
//! fixed-size line windows. Windowed output is still a valid edit script but
//! may not be minimal, and is flagged on the resulting [`Diff`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::VaultError;
use crate::models::snapshot::{CommitRef, Snapshot};

/// Kind of a diff operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Delete,
    Context,
}

/// A single line-level operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOp {
    pub kind: OpKind,

    /// 1-based line number in the base text (deletes and context)
    pub base_line: Option<usize>,

    /// 1-based line number in the candidate text (inserts and context)
    pub candidate_line: Option<usize>,

    pub text: String,

    /// Enclosing section headers, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section: Vec<String>,
}

impl DiffOp {
    pub fn is_change(&self) -> bool {
        self.kind != OpKind::Context
    }
}

/// Diff tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Unchanged lines kept around each change
    pub context_lines: usize,

    /// Largest LCS table (base x candidate lines) computed in one piece
    pub max_cells: usize,

    /// Window size used once `max_cells` is exceeded
    pub window_lines: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            max_cells: 1_000_000,
            window_lines: 512,
        }
    }
}

/// Structured delta between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub base: Option<CommitRef>,
    pub candidate: Option<CommitRef>,
    pub ops: Vec<DiffOp>,

    /// Set when the windowed comparison was used
    pub windowed: bool,
}

/// Counts consumed by reporting collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub inserts: usize,
    pub deletes: usize,
    pub context: usize,
    pub windowed: bool,
}

impl Diff {
    /// An empty diff means "no change"
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations that are not context
    pub fn changes(&self) -> impl Iterator<Item = &DiffOp> {
        self.ops.iter().filter(|op| op.is_change())
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary {
            inserts: 0,
            deletes: 0,
            context: 0,
            windowed: self.windowed,
        };
        for op in &self.ops {
            match op.kind {
                OpKind::Insert => summary.inserts += 1,
                OpKind::Delete => summary.deletes += 1,
                OpKind::Context => summary.context += 1,
            }
        }
        summary
    }

    /// Unified-style text rendering (`+`, `-`, and space prefixes)
    pub fn to_unified(&self) -> String {
        self.ops
            .iter()
            .map(|op| {
                let prefix = match op.kind {
                    OpKind::Insert => '+',
                    OpKind::Delete => '-',
                    OpKind::Context => ' ',
                };
                format!("{}{}", prefix, op.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Diff two snapshots of the same device
pub fn compute_diff(
    base: &Snapshot,
    candidate: &Snapshot,
    options: &DiffOptions,
) -> Result<Diff, VaultError> {
    let mut diff = diff_text(&base.config, &candidate.config, options)?;
    diff.base = Some(base.commit.clone());
    diff.candidate = Some(candidate.commit.clone());
    Ok(diff)
}

/// Diff two normalized texts
///
/// Fails with [`VaultError::EmptyInput`] only when both sides are empty.
pub fn diff_text(base: &str, candidate: &str, options: &DiffOptions) -> Result<Diff, VaultError> {
    let a: Vec<&str> = base.lines().collect();
    let b: Vec<&str> = candidate.lines().collect();
    if a.is_empty() && b.is_empty() {
        return Err(VaultError::EmptyInput);
    }

    let (script, windowed) = edit_script(&a, &b, options);
    let ops = to_ops(&script, &a, &b, options.context_lines);
    Ok(Diff {
        base: None,
        candidate: None,
        ops,
        windowed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

fn edit_script(a: &[&str], b: &[&str], options: &DiffOptions) -> (Vec<Step>, bool) {
    let mut script = Vec::with_capacity(a.len().max(b.len()));

    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    script.extend((0..prefix).map(|i| Step::Equal(i, i)));

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];
    let cells = mid_a.len().saturating_mul(mid_b.len());

    let windowed = cells > options.max_cells;
    if !windowed {
        lcs_script(mid_a, mid_b, prefix, prefix, &mut script);
    } else {
        let budget_side = (options.max_cells as f64).sqrt() as usize;
        let window = options.window_lines.min(budget_side).max(1);
        warn!(
            "Diff of {}x{} lines exceeds {} cells, comparing in {}-line windows",
            mid_a.len(),
            mid_b.len(),
            options.max_cells,
            window
        );
        let windows = mid_a.len().max(mid_b.len()).div_ceil(window);
        for k in 0..windows {
            let wa = window_slice(mid_a, k, window);
            let wb = window_slice(mid_b, k, window);
            lcs_script(wa, wb, prefix + k * window, prefix + k * window, &mut script);
        }
    }

    let a_tail = a.len() - suffix;
    let b_tail = b.len() - suffix;
    script.extend((0..suffix).map(|s| Step::Equal(a_tail + s, b_tail + s)));

    (script, windowed)
}

fn window_slice<'a, 'b>(lines: &'a [&'b str], k: usize, window: usize) -> &'a [&'b str] {
    let start = (k * window).min(lines.len());
    let end = ((k + 1) * window).min(lines.len());
    &lines[start..end]
}

/// LCS alignment of `a` against `b`, appending steps with the given offsets.
///
/// Among equally long alignments the walk prefers matching the earliest
/// possible base line: on a tie it consumes a candidate line first.
fn lcs_script(a: &[&str], b: &[&str], a_off: usize, b_off: usize, out: &mut Vec<Step>) {
    let m = a.len();
    let n = b.len();
    let width = n + 1;

    // dp[i * width + j] = LCS length of a[i..] and b[j..]
    let mut dp = vec![0u32; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i * width + j] = if a[i] == b[j] {
                dp[(i + 1) * width + j + 1] + 1
            } else {
                dp[(i + 1) * width + j].max(dp[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            out.push(Step::Equal(a_off + i, b_off + j));
            i += 1;
            j += 1;
        } else if dp[(i + 1) * width + j] > dp[i * width + j + 1] {
            out.push(Step::Delete(a_off + i));
            i += 1;
        } else {
            out.push(Step::Insert(b_off + j));
            j += 1;
        }
    }
    out.extend((i..m).map(|i| Step::Delete(a_off + i)));
    out.extend((j..n).map(|j| Step::Insert(b_off + j)));
}

fn to_ops(script: &[Step], a: &[&str], b: &[&str], context: usize) -> Vec<DiffOp> {
    let is_change = |s: &Step| !matches!(s, Step::Equal(..));
    if !script.iter().any(is_change) {
        return Vec::new();
    }

    // distance (in steps) to the nearest change on either side
    let len = script.len();
    let mut near = vec![usize::MAX; len];
    let mut last: Option<usize> = None;
    for (k, step) in script.iter().enumerate() {
        if is_change(step) {
            last = Some(k);
        }
        if let Some(l) = last {
            near[k] = k - l;
        }
    }
    let mut next: Option<usize> = None;
    for k in (0..len).rev() {
        if is_change(&script[k]) {
            next = Some(k);
        }
        if let Some(n) = next {
            near[k] = near[k].min(n - k);
        }
    }

    let a_sections = section_paths(a);
    let b_sections = section_paths(b);

    script
        .iter()
        .enumerate()
        .filter(|(k, _)| near[*k] <= context)
        .map(|(_, step)| match *step {
            Step::Equal(i, j) => DiffOp {
                kind: OpKind::Context,
                base_line: Some(i + 1),
                candidate_line: Some(j + 1),
                text: a[i].to_string(),
                section: Vec::new(),
            },
            Step::Delete(i) => DiffOp {
                kind: OpKind::Delete,
                base_line: Some(i + 1),
                candidate_line: None,
                text: a[i].to_string(),
                section: a_sections[i].clone(),
            },
            Step::Insert(j) => DiffOp {
                kind: OpKind::Insert,
                base_line: None,
                candidate_line: Some(j + 1),
                text: b[j].to_string(),
                section: b_sections[j].clone(),
            },
        })
        .collect()
}

/// Enclosing section headers for every line, derived from indentation.
///
/// A line opens a section for the deeper-indented lines that follow it.
/// Trailing `{` is stripped from headers and closing braces never open one,
/// which makes brace-structured configs resolve the same way.
pub fn section_paths(lines: &[&str]) -> Vec<Vec<String>> {
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut paths = Vec::with_capacity(lines.len());

    for line in lines {
        let trimmed = line.trim();
        let indent = line.len() - line.trim_start().len();

        while matches!(stack.last(), Some((depth, _)) if *depth >= indent) {
            stack.pop();
        }
        paths.push(stack.iter().map(|(_, header)| header.clone()).collect());

        if !trimmed.is_empty() && !trimmed.starts_with('}') {
            let header = trimmed.trim_end_matches('{').trim_end().to_string();
            stack.push((indent, header));
        }
    }

    paths
}
