//! Query Validator - checks the assistant's numeric claims against the data.
//!
//! Scans final assistant text for SELECT statements, re-executes them
//! against the session's store, and compares numbers claimed in the
//! surrounding prose with the first result row. A claim only counts as a
//! discrepancy when it misses every numeric cell by both the absolute and
//! the relative threshold, which keeps rounding and unit chatter quiet.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::store::TabularStore;

/// Absolute difference below which a claim is never flagged
const ABSOLUTE_TOLERANCE: f64 = 10.0;
/// Relative error below which a claim is never flagged
const RELATIVE_TOLERANCE: f64 = 0.05;
/// Prose window inspected around each SQL match
const WINDOW_AFTER: usize = 300;
const WINDOW_BEFORE: usize = 200;

static SQL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bSELECT\b[^;`\n]+?\bFROM\b\s+[A-Za-z_]\w*(?:\s+(?:WHERE|GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT)\b[^;`\n]*)?",
    )
    .expect("SQL extraction regex")
});

static CLAIM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\breturn(?:s|ed)?\s+(-?\d+(?:\.\d+)?)",
        r"(?i)\bshow(?:s|ed|ing)?\s+(-?\d+(?:\.\d+)?)",
        r"(?i)\b(?:was|is|are|were)\s+(-?\d+(?:\.\d+)?)",
        r"(?i)\b(?:maximum|minimum|average|max|min|avg|mean|count)\b[^.\n]{0,40}?\b(?:was|is|of|at|=)\s*(-?\d+(?:\.\d+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("claim pattern"))
    .collect()
});

/// A bare number directly following the SQL ("... FROM gps_0_data: 1448")
static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\s:=\-`]*(-?\d+(?:\.\d+)?)").expect("leading number pattern")
});

/// One claimed value that missed every cell of the actual first row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Discrepancy {
    pub claimed: f64,
    /// Closest actual value the claim was compared against
    pub actual: f64,
}

/// Outcome of re-executing one extracted statement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub sql: String,
    pub claimed_numbers: Vec<f64>,
    #[schema(value_type = Vec<Object>)]
    pub actual_first_row: Vec<serde_json::Value>,
    pub discrepancies: Vec<Discrepancy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_queries: usize,
    pub valid_queries: usize,
    pub queries_with_discrepancies: usize,
    pub validations: Vec<ValidationRecord>,
}

impl ValidationSummary {
    pub fn has_discrepancies(&self) -> bool {
        self.queries_with_discrepancies > 0
    }
}

pub struct QueryValidator;

impl QueryValidator {
    /// Validate every SQL statement cited in `text` against `store`
    pub fn validate(text: &str, store: &TabularStore) -> ValidationSummary {
        let mut summary = ValidationSummary::default();

        for m in SQL_RE.find_iter(text) {
            let sql = trim_sql(m.as_str());
            summary.total_queries += 1;

            let claimed = extract_claimed_numbers(text, m.start(), m.end());

            match store.query(&sql) {
                Ok(output) => {
                    summary.valid_queries += 1;
                    let actual_first_row =
                        output.rows.first().cloned().unwrap_or_default();
                    let actual_numbers: Vec<f64> = actual_first_row
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .collect();

                    let discrepancies = find_discrepancies(&claimed, &actual_numbers);
                    if !discrepancies.is_empty() {
                        summary.queries_with_discrepancies += 1;
                    }

                    summary.validations.push(ValidationRecord {
                        sql,
                        claimed_numbers: claimed,
                        actual_first_row,
                        discrepancies,
                        error: None,
                    });
                },
                Err(e) => {
                    tracing::debug!("Cited query failed to re-execute: {}", e);
                    summary.validations.push(ValidationRecord {
                        sql,
                        claimed_numbers: claimed,
                        actual_first_row: Vec::new(),
                        discrepancies: Vec::new(),
                        error: Some(e.to_string()),
                    });
                },
            }
        }

        summary
    }
}

fn trim_sql(raw: &str) -> String {
    raw.trim().trim_end_matches(['.', ',', ':', '!', '?', ')', '"', '\'']).trim().to_string()
}

/// Collect candidate numbers from the prose around one SQL match.
/// Every candidate is recorded; multi-number answers may over-report.
fn extract_claimed_numbers(text: &str, sql_start: usize, sql_end: usize) -> Vec<f64> {
    let mut before_start = sql_start.saturating_sub(WINDOW_BEFORE);
    while !text.is_char_boundary(before_start) {
        before_start += 1;
    }
    let mut after_end = (sql_end + WINDOW_AFTER).min(text.len());
    while !text.is_char_boundary(after_end) {
        after_end -= 1;
    }

    let before = &text[before_start..sql_start];
    let after = &text[sql_end..after_end];

    let mut claimed = Vec::new();
    for window in [before, after] {
        for pattern in CLAIM_PATTERNS.iter() {
            for captures in pattern.captures_iter(window) {
                if let Some(value) = captures.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                    claimed.push(value);
                }
            }
        }
    }
    if let Some(value) = LEADING_NUMBER
        .captures(after)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        claimed.push(value);
    }

    let mut unique = Vec::new();
    for value in claimed {
        if !unique.iter().any(|u: &f64| u.to_bits() == value.to_bits()) {
            unique.push(value);
        }
    }
    unique
}

/// A claim is discrepant when every actual cell misses it by both the
/// absolute and the relative threshold
fn find_discrepancies(claimed: &[f64], actual: &[f64]) -> Vec<Discrepancy> {
    if actual.is_empty() {
        return Vec::new();
    }

    let mut discrepancies = Vec::new();
    for &claim in claimed {
        let mut closest = actual[0];
        let mut matched = false;
        for &cell in actual {
            let diff = (claim - cell).abs();
            let relative = diff / cell.abs().max(f64::EPSILON);
            if diff <= ABSOLUTE_TOLERANCE || relative <= RELATIVE_TOLERANCE {
                matched = true;
                break;
            }
            if (claim - cell).abs() < (claim - closest).abs() {
                closest = cell;
            }
        }
        if !matched {
            discrepancies.push(Discrepancy { claimed: claim, actual: closest });
        }
    }
    discrepancies
}
