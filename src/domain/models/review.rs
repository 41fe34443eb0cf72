//! Review-cycle domain model: reviewer verdicts and parsed findings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall verdict the reviewer agent reaches for a wave's merged diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    ChangesRequested,
}

/// Severity bucket a finding's markdown heading falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Blocking,
    Minor,
    Nit,
}

/// A single finding parsed out of the reviewer's markdown report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: FindingSeverity,
    pub description: String,
    pub file_hint: Option<String>,
}

/// The outcome of one review cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycle {
    pub cycle_number: u32,
    pub verdict: Verdict,
    pub findings: Vec<Finding>,
    pub raw_report: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReviewCycle {
    /// Blocking findings become new review-fix tasks; others are recorded
    /// but don't gate approval.
    pub fn blocking_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == FindingSeverity::Blocking)
    }

    pub fn needs_fix_tasks(&self) -> bool {
        matches!(self.verdict, Verdict::ChangesRequested) && self.blocking_findings().next().is_some()
    }
}

/// Parse a reviewer's markdown report into a verdict plus a findings list.
///
/// Tolerant of `-`, `*`, and `- [ ]`/`- [x]` bullet styles under a
/// severity heading; a heading section the parser doesn't recognize is
/// logged and skipped rather than treated as a parse failure, since the
/// reviewer agent's exact markdown dialect isn't contractually fixed.
pub fn parse_review_report(report: &str, cycle_number: u32) -> ReviewCycle {
    let verdict = if report.to_lowercase().contains("changes requested")
        || report.to_lowercase().contains("request changes")
    {
        Verdict::ChangesRequested
    } else {
        Verdict::Approved
    };

    let mut findings = Vec::new();
    let mut current_severity: Option<FindingSeverity> = None;

    for line in report.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();

        if lower.starts_with('#') {
            current_severity = if lower.contains("blocking") {
                Some(FindingSeverity::Blocking)
            } else if lower.contains("minor") {
                Some(FindingSeverity::Minor)
            } else if lower.contains("nit") {
                Some(FindingSeverity::Nit)
            } else {
                tracing::debug!(heading = %trimmed, "unrecognized review report heading, skipping");
                None
            };
            continue;
        }

        let Some(severity) = current_severity else { continue };
        let bullet = strip_bullet(trimmed);
        let Some(text) = bullet else { continue };
        if text.is_empty() {
            continue;
        }

        let file_hint = extract_file_hint(text);
        findings.push(Finding {
            severity,
            description: text.to_string(),
            file_hint,
        });
    }

    ReviewCycle {
        cycle_number,
        verdict,
        findings,
        raw_report: report.to_string(),
        recorded_at: Utc::now(),
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    let line = line.strip_prefix("- [ ]").or_else(|| line.strip_prefix("- [x]")).unwrap_or(line);
    line.strip_prefix('-')
        .or_else(|| line.strip_prefix('*'))
        .map(str::trim)
}

fn extract_file_hint(text: &str) -> Option<String> {
    // Findings commonly lead with a `path/to/file.rs:123` reference.
    let candidate = text.split_whitespace().next()?;
    if candidate.contains('/') || candidate.contains('.') {
        Some(candidate.trim_end_matches(':').to_string())
    } else {
        None
    }
}
