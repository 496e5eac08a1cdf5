use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::models::{
    OriginBatchRow, OriginPattern, StatusTotal, TaskStatus, TranscriptionTask, WindowTotals,
};
use crate::core::aggregate::{AggregationWindow, TaskSource};
use crate::core::error::{ReportError, Result};

/// Task source over rows already in memory, e.g. a previous `transcription_data` export.
pub struct MemoryTaskSource {
    tasks: Vec<TranscriptionTask>,
    origin_pattern: Option<OriginPattern>,
}

impl MemoryTaskSource {
    pub fn new(tasks: Vec<TranscriptionTask>) -> Self {
        Self {
            tasks,
            origin_pattern: None,
        }
    }

    /// Re-key tasks through `pattern` when grouping, as the SQL source does.
    pub fn with_origin_pattern(mut self, pattern: Option<OriginPattern>) -> Self {
        self.origin_pattern = pattern;
        self
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        info!("Loading tasks from {}", path.display());
        let file = std::fs::File::open(path).map_err(|e| {
            ReportError::Config(format!("cannot open task file {}: {}", path.display(), e))
        })?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut tasks = Vec::new();
        for record in reader.deserialize() {
            let task: TranscriptionTask = record?;
            if task.duration_seconds < 0.0 || task.duration_seconds.is_nan() {
                return Err(ReportError::InvalidData(format!(
                    "task {} has duration {}",
                    task.id, task.duration_seconds
                )));
            }
            tasks.push(task);
        }
        info!("Loaded {} tasks", tasks.len());
        Ok(Self::new(tasks))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// With a pattern the key is re-derived from the segment name, as the SQL
    /// source derives it from the origin column. Without one the stored key is kept.
    fn batch_key<'a>(&self, task: &'a TranscriptionTask) -> &'a str {
        match &self.origin_pattern {
            Some(pattern) => pattern.extract(segment_name(task)),
            None => &task.origin_batch_id,
        }
    }
}

/// Exports without a `segment_name` column carry the name in `origin_batch_id`.
fn segment_name(task: &TranscriptionTask) -> &str {
    if task.segment_name.is_empty() {
        &task.origin_batch_id
    } else {
        &task.segment_name
    }
}

impl TaskSource for MemoryTaskSource {
    async fn status_totals(&mut self) -> Result<Vec<StatusTotal>> {
        let mut totals: BTreeMap<&TaskStatus, StatusTotal> = BTreeMap::new();
        for task in &self.tasks {
            let entry = totals.entry(&task.status).or_insert_with(|| StatusTotal {
                status: task.status.clone(),
                count: 0,
                duration_seconds: 0.0,
            });
            entry.count += 1;
            entry.duration_seconds += task.duration_seconds;
        }
        Ok(totals.into_values().collect())
    }

    async fn window_totals(
        &mut self,
        window: &AggregationWindow,
        completed: &[TaskStatus],
    ) -> Result<WindowTotals> {
        let mut totals = WindowTotals::default();
        let in_scope = self.tasks.iter().filter(|task| {
            task.updated_at.is_some_and(|at| window.contains(at))
                && (completed.is_empty() || completed.contains(&task.status))
        });
        for task in in_scope {
            totals.count += 1;
            totals.duration_seconds += task.duration_seconds;
        }
        Ok(totals)
    }

    async fn batch_breakdown(&mut self) -> Result<Vec<OriginBatchRow>> {
        let mut rows: BTreeMap<&str, OriginBatchRow> = BTreeMap::new();
        for task in &self.tasks {
            let key = self.batch_key(task);
            rows.entry(key)
                .or_insert_with(|| OriginBatchRow::new(key))
                .record(&task.status, task.duration_seconds);
        }
        Ok(rows.into_values().collect())
    }

    async fn tasks(&mut self) -> Result<Vec<TranscriptionTask>> {
        Ok(self
            .tasks
            .iter()
            .map(|task| TranscriptionTask {
                segment_name: segment_name(task).to_string(),
                origin_batch_id: self.batch_key(task).to_string(),
                ..task.clone()
            })
            .collect())
    }
}
