//! Column selectors used by transform `DataProcessing` filters.
//!
//! Delimited records are treated as arrays and filtered with the JSONPath
//! subset the batch transform service accepts for CSV: `$` (whole record),
//! `$[i]`, `$[i,j,...]` and slices `$[a:b]` with open ends. Negative indices
//! count from the end of the record.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Index(i64),
    Slice { start: Option<i64>, end: Option<i64> },
}

/// A parsed column filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnSelector {
    raw: String,
    selections: Option<Vec<Selection>>,
}

impl ColumnSelector {
    /// Selector that keeps the whole record.
    #[must_use]
    pub fn all() -> Self {
        Self { raw: "$".to_string(), selections: None }
    }

    pub fn parse(raw: &str) -> JobResult<Self> {
        let trimmed = raw.trim();
        if trimmed == "$" {
            return Ok(Self::all());
        }

        let inner = trimmed
            .strip_prefix("$[")
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| invalid(raw, "expected `$` or `$[...]`"))?;

        if inner.trim().is_empty() {
            return Err(invalid(raw, "empty selection"));
        }

        let mut selections = Vec::new();
        for part in inner.split(',') {
            let part = part.trim();
            if let Some((start, end)) = part.split_once(':') {
                selections.push(Selection::Slice {
                    start: parse_bound(raw, start)?,
                    end: parse_bound(raw, end)?,
                });
            } else {
                let index = part
                    .parse::<i64>()
                    .map_err(|_| invalid(raw, &format!("`{part}` is not a column index")))?;
                selections.push(Selection::Index(index));
            }
        }

        Ok(Self { raw: trimmed.to_string(), selections: Some(selections) })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_all(&self) -> bool {
        self.selections.is_none()
    }

    /// Apply the selector to one record's fields.
    pub fn apply<'a>(&self, fields: &[&'a str]) -> JobResult<Vec<&'a str>> {
        let Some(selections) = &self.selections else {
            return Ok(fields.to_vec());
        };

        let len = fields.len() as i64;
        let mut out = Vec::new();
        for sel in selections {
            match *sel {
                Selection::Index(i) => {
                    let idx = if i < 0 { len + i } else { i };
                    if idx < 0 || idx >= len {
                        return Err(JobError::DataInconsistency(format!(
                            "filter {} selects column {} but the record has {} fields",
                            self.raw, i, len
                        )));
                    }
                    out.push(fields[idx as usize]);
                }
                Selection::Slice { start, end } => {
                    let start = clamp(start.unwrap_or(0), len);
                    let end = clamp(end.unwrap_or(len), len);
                    for idx in start..end.max(start) {
                        out.push(fields[idx as usize]);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn clamp(bound: i64, len: i64) -> i64 {
    let b = if bound < 0 { len + bound } else { bound };
    b.clamp(0, len)
}

fn parse_bound(raw: &str, s: &str) -> JobResult<Option<i64>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse::<i64>()
        .map(Some)
        .map_err(|_| invalid(raw, &format!("`{s}` is not a slice bound")))
}

fn invalid(raw: &str, why: &str) -> JobError {
    JobError::SpecValidation(format!("invalid column filter `{raw}`: {why}"))
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ColumnSelector {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ColumnSelector {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ColumnSelector> for String {
    fn from(value: ColumnSelector) -> Self {
        value.raw
    }
}
