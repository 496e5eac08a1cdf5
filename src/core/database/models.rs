use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{ReportError, Result};

/// One transcription task as stored in the source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionTask {
    pub id: String,
    /// Raw origin column value, e.g. `STT_GR_0001_0003_22300_to_27800`.
    /// Older exports without the column load it as empty.
    #[serde(default)]
    pub segment_name: String,
    pub origin_batch_id: String,
    pub status: TaskStatus,
    pub duration_seconds: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Workflow state of a task. Values outside the known three are kept as-is.
///
/// Variant order is report order: the named statuses first, then the rest by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Transcribing,
    Submitted,
    Trashed,
    Other(String),
}

impl TaskStatus {
    pub const NAMED: [TaskStatus; 3] = [
        TaskStatus::Transcribing,
        TaskStatus::Submitted,
        TaskStatus::Trashed,
    ];

    /// A blank value is `unknown`, the same as a NULL status in the database.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "transcribing" => TaskStatus::Transcribing,
            "submitted" => TaskStatus::Submitted,
            "trashed" => TaskStatus::Trashed,
            "" => TaskStatus::Other("unknown".to_string()),
            _ => TaskStatus::Other(normalized),
        }
    }

    /// Stored (lowercase) form.
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Transcribing => "transcribing",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Trashed => "trashed",
            TaskStatus::Other(raw) => raw,
        }
    }

    /// Display form used in report tables.
    pub fn label(&self) -> String {
        let mut chars = self.as_str().chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TaskStatus {
    fn from(raw: String) -> Self {
        TaskStatus::parse(&raw)
    }
}

impl From<&str> for TaskStatus {
    fn from(raw: &str) -> Self {
        TaskStatus::parse(raw)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Maps a segment name like `STT_GR_0001_0003_22300_to_27800` to its origin batch.
///
/// With a capture group the first group is the key, otherwise the whole match.
/// Names the pattern does not match are their own key.
#[derive(Debug, Clone)]
pub struct OriginPattern(Regex);

impl OriginPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| ReportError::Config(format!("invalid origin_pattern: {}", e)))
    }

    pub fn extract<'a>(&self, name: &'a str) -> &'a str {
        let Some(caps) = self.0.captures(name) else {
            return name;
        };
        let group = if self.0.captures_len() > 1 { 1 } else { 0 };
        caps.get(group).map_or(name, |m| m.as_str())
    }
}

/// Count and summed duration for one status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTotal {
    pub status: TaskStatus,
    pub count: u64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusSlice {
    pub count: u64,
    pub duration_seconds: f64,
}

/// Totals for the tasks that fall inside the reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowTotals {
    pub count: u64,
    pub duration_seconds: f64,
}

/// Segment counts and durations for one origin batch, split by status.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OriginBatchRow {
    pub origin_batch_id: String,
    pub total_segments: u64,
    pub total_duration_seconds: f64,
    pub submitted: StatusSlice,
    pub transcribing: StatusSlice,
    pub trashed: StatusSlice,
}

impl OriginBatchRow {
    pub fn new(origin_batch_id: impl Into<String>) -> Self {
        Self {
            origin_batch_id: origin_batch_id.into(),
            ..Self::default()
        }
    }

    /// Add one task. Unknown statuses only count toward the totals.
    pub fn record(&mut self, status: &TaskStatus, duration_seconds: f64) {
        self.total_segments += 1;
        self.total_duration_seconds += duration_seconds;
        if let Some(slice) = self.slice_mut(status) {
            slice.count += 1;
            slice.duration_seconds += duration_seconds;
        }
    }

    pub fn slice(&self, status: &TaskStatus) -> Option<&StatusSlice> {
        match status {
            TaskStatus::Submitted => Some(&self.submitted),
            TaskStatus::Transcribing => Some(&self.transcribing),
            TaskStatus::Trashed => Some(&self.trashed),
            TaskStatus::Other(_) => None,
        }
    }

    fn slice_mut(&mut self, status: &TaskStatus) -> Option<&mut StatusSlice> {
        match status {
            TaskStatus::Submitted => Some(&mut self.submitted),
            TaskStatus::Transcribing => Some(&mut self.transcribing),
            TaskStatus::Trashed => Some(&mut self.trashed),
            TaskStatus::Other(_) => None,
        }
    }

    pub fn named_count(&self) -> u64 {
        self.submitted.count + self.transcribing.count + self.trashed.count
    }

    pub fn named_duration_seconds(&self) -> f64 {
        self.submitted.duration_seconds
            + self.transcribing.duration_seconds
            + self.trashed.duration_seconds
    }

    /// Segments whose status is none of the named three.
    pub fn unclassified_count(&self) -> u64 {
        self.total_segments.saturating_sub(self.named_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(TaskStatus::parse("Submitted"), TaskStatus::Submitted);
        assert_eq!(TaskStatus::parse(" transcribing "), TaskStatus::Transcribing);
        assert_eq!(TaskStatus::parse("TRASHED"), TaskStatus::Trashed);
        assert_eq!(
            TaskStatus::parse("Archived"),
            TaskStatus::Other("archived".to_string())
        );
    }

    #[test]
    fn test_blank_status_is_unknown() {
        let unknown = TaskStatus::Other("unknown".to_string());
        assert_eq!(TaskStatus::parse(""), unknown);
        assert_eq!(TaskStatus::parse("   "), unknown);
        assert_eq!(TaskStatus::from(String::new()).label(), "Unknown");
    }

    #[test]
    fn test_status_order_and_labels() {
        let mut statuses = vec![
            TaskStatus::parse("archived"),
            TaskStatus::Trashed,
            TaskStatus::Submitted,
            TaskStatus::parse("aborted"),
            TaskStatus::Transcribing,
        ];
        statuses.sort();
        let labels: Vec<String> = statuses.iter().map(TaskStatus::label).collect();
        assert_eq!(
            labels,
            vec!["Transcribing", "Submitted", "Trashed", "Aborted", "Archived"]
        );
    }

    #[test]
    fn test_origin_pattern_extracts_batch() {
        let pattern = OriginPattern::new(r"(STT_GR_\d+)_").unwrap();
        assert_eq!(pattern.extract("STT_GR_0001_0003_22300_to_27800"), "STT_GR_0001");
        assert_eq!(pattern.extract("unrelated_name"), "unrelated_name");

        let whole = OriginPattern::new(r"STT_GR_\d+").unwrap();
        assert_eq!(whole.extract("STT_GR_0042_0001"), "STT_GR_0042");

        let anchored = OriginPattern::new(r"^(STT_GR_\d+)_").unwrap();
        assert_eq!(anchored.extract("STT_GR_0007_0001_0_to_900"), "STT_GR_0007");
        assert_eq!(anchored.extract("old_STT_GR_0007_0001"), "old_STT_GR_0007_0001");
    }

    #[test]
    fn test_unknown_status_counts_toward_total_only() {
        let mut row = OriginBatchRow::new("STT_GR_0001");
        row.record(&TaskStatus::Submitted, 30.0);
        row.record(&TaskStatus::Trashed, 12.5);
        row.record(&TaskStatus::parse("Archived"), 20.0);

        assert_eq!(row.total_segments, 3);
        assert_eq!(row.named_count(), 2);
        assert_eq!(row.unclassified_count(), 1);
        assert!((row.total_duration_seconds - 62.5).abs() < 1e-9);
        assert!((row.named_duration_seconds() - 42.5).abs() < 1e-9);
        assert_eq!(row.slice(&TaskStatus::parse("archived")), None);
    }
}
