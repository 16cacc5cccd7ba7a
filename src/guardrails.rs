// propagate-rs/src/guardrails.rs
// Fail-closed safety checks: protected-path matching and CI gating.
//
// Patterns support `*` (within a path segment), `**` (any number of
// segments), `?` (single character), and a trailing `/` as shorthand for
// the whole subtree. When in doubt the answer is escalation, never
// continuation.

use serde::{Deserialize, Serialize};

use crate::providers::CiStatus;

/// Number of consecutive unknown CI polls tolerated before escalation.
pub const UNKNOWN_CI_POLL_LIMIT: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardrails {
    pub protected_globs: Vec<String>,
    /// Attempts to fetch the PR's changed-file list before failing closed.
    pub max_file_list_attempts: u32,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            protected_globs: vec![
                "infra/**".to_string(),
                ".github/workflows/**".to_string(),
                "terraform/**".to_string(),
                "k8s/**".to_string(),
            ],
            max_file_list_attempts: 3,
        }
    }
}

/// Verdict of the CI gate for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiGate {
    /// Affirmative success signal.
    Green,
    /// Still pending; keep polling.
    Pending,
    /// Failure or indeterminate CI; escalate with the triggering rule.
    Escalate(String),
}

impl Guardrails {
    pub fn new(protected_globs: Vec<String>) -> Self {
        Self {
            protected_globs,
            ..Self::default()
        }
    }

    /// Changed paths that fall under a protected pattern.
    pub fn protected_violations(&self, changed_files: &[String]) -> Vec<String> {
        changed_files
            .iter()
            .filter(|path| {
                self.protected_globs
                    .iter()
                    .any(|pattern| glob_match(pattern, path))
            })
            .cloned()
            .collect()
    }

    /// Evaluate the CI gate. `consecutive_unknowns` counts this poll when
    /// the status is unknown.
    pub fn ci_gate(&self, status: CiStatus, consecutive_unknowns: u32) -> CiGate {
        match status {
            CiStatus::Success => CiGate::Green,
            CiStatus::Failure => CiGate::Escalate("ci-failure".to_string()),
            CiStatus::Pending => CiGate::Pending,
            CiStatus::Unknown => {
                if consecutive_unknowns >= UNKNOWN_CI_POLL_LIMIT {
                    CiGate::Escalate(format!(
                        "ci-unknown after {consecutive_unknowns} consecutive polls"
                    ))
                } else {
                    CiGate::Pending
                }
            }
        }
    }
}

/// Match a path against a protected pattern.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    // Trailing slash means the whole subtree.
    if let Some(prefix) = pattern.strip_suffix('/') {
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // `**` absorbs zero or more path segments.
            match_segments(&pattern[1..], path)
                || (!path.is_empty() && match_segments(pattern, &path[1..]))
        }
        (None, Some(_)) => false,
        (Some(_), None) => false,
        (Some(seg_pattern), Some(segment)) => {
            match_segment(seg_pattern, segment) && match_segments(&pattern[1..], &path[1..])
        }
    }
}

fn match_segment(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    match_chars(&p, &s)
}

fn match_chars(pattern: &[char], segment: &[char]) -> bool {
    match (pattern.first(), segment.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            match_chars(&pattern[1..], segment)
                || (!segment.is_empty() && match_chars(pattern, &segment[1..]))
        }
        (None, Some(_)) => false,
        (Some(_), None) => false,
        (Some('?'), Some(_)) => match_chars(&pattern[1..], &segment[1..]),
        (Some(pc), Some(sc)) => pc == sc && match_chars(&pattern[1..], &segment[1..]),
    }
}
