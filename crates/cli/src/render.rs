#![forbid(unsafe_code)]

use cf_core::{Forest, PersistOutcome, TreeInstance};
use serde::Serialize;
use std::fmt::Write as _;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Indented instance tree. Clones are listed under every parent and marked
/// with their instance count; starred nodes carry a `*`.
pub fn tree_text(forest: &Forest) -> String {
    let mut out = String::new();
    for instance in forest.tree() {
        write_instance(forest, &instance, 0, &mut out);
    }
    out
}

fn write_instance(forest: &Forest, instance: &TreeInstance, depth: usize, out: &mut String) {
    let Some(node) = forest.node(&instance.id) else {
        return;
    };
    let star = if node.starred { "* " } else { "" };
    let _ = write!(out, "{}{star}{} [{}]", "  ".repeat(depth), node.name, node.id);
    if node.is_clone() {
        let _ = write!(out, " (clone x{})", node.parent_ids.len());
    }
    out.push('\n');
    for child in &instance.children {
        write_instance(forest, child, depth + 1, out);
    }
}

pub fn tree_json(forest: &Forest) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&forest.flatten())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutcomeLine {
    pub seq: u64,
    pub kind: &'static str,
    pub phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeLine {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<&PersistOutcome> for OutcomeLine {
    fn from(outcome: &PersistOutcome) -> Self {
        let (at, error) = match &outcome.result {
            Ok(ms) => (Some(format_ms(*ms)), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            seq: outcome.seq,
            kind: outcome.kind.as_str(),
            phase: outcome.phase.as_str(),
            at,
            error,
        }
    }
}

impl std::fmt::Display for OutcomeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} {}", self.seq, self.phase, self.kind)?;
        match (&self.at, &self.error) {
            (_, Some(error)) => write!(f, " failed: {error}"),
            (Some(at), None) => write!(f, " at {at}"),
            (None, None) => Ok(()),
        }
    }
}

/// RFC 3339 for a millisecond timestamp; the raw number when out of range.
pub fn format_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
