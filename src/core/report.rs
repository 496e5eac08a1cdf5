use chrono::NaiveDate;
use serde::Serialize;

use crate::core::aggregate::{Aggregation, AggregationWindow};
use crate::core::database::models::{OriginBatchRow, TranscriptionTask};
use crate::core::error::Result;

/// Origin batches shown in the markdown report; the CSV export has all of them.
pub const MARKDOWN_BATCH_LIMIT: usize = 10;

pub const BREAKDOWN_STEM: &str = "original_id_breakdown";
pub const SUMMARY_STEM: &str = "summary_report";
pub const TASKS_STEM: &str = "transcription_data";

/// File-name date stamp for dated artifacts.
pub const DATE_STAMP_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub run_date: NaiveDate,
    pub markdown: String,
    pub breakdown_csv: String,
    pub tasks_csv: Option<String>,
}

#[derive(Debug, Serialize)]
struct BreakdownRecord<'a> {
    origin_batch_id: &'a str,
    total_segments: u64,
    total_duration_min: String,
    submitted_count: u64,
    submitted_duration_min: String,
    transcribing_count: u64,
    transcribing_duration_min: String,
    trashed_count: u64,
    trashed_duration_min: String,
}

impl<'a> From<&'a OriginBatchRow> for BreakdownRecord<'a> {
    fn from(row: &'a OriginBatchRow) -> Self {
        Self {
            origin_batch_id: &row.origin_batch_id,
            total_segments: row.total_segments,
            total_duration_min: minutes(row.total_duration_seconds),
            submitted_count: row.submitted.count,
            submitted_duration_min: minutes(row.submitted.duration_seconds),
            transcribing_count: row.transcribing.count,
            transcribing_duration_min: minutes(row.transcribing.duration_seconds),
            trashed_count: row.trashed.count,
            trashed_duration_min: minutes(row.trashed.duration_seconds),
        }
    }
}

/// Render every artifact for one run. Pure: same input and date, same bytes.
pub fn render(
    aggregation: &Aggregation,
    window: &AggregationWindow,
    run_date: NaiveDate,
) -> Result<RenderedReport> {
    let batches = sorted_batches(&aggregation.batches);

    Ok(RenderedReport {
        run_date,
        markdown: render_markdown(aggregation, &batches, window, run_date),
        breakdown_csv: render_breakdown_csv(&batches)?,
        tasks_csv: aggregation
            .tasks
            .as_deref()
            .map(render_tasks_csv)
            .transpose()?,
    })
}

/// Batches ordered by id, byte-wise ascending. The sort is stable.
pub fn sorted_batches(batches: &[OriginBatchRow]) -> Vec<&OriginBatchRow> {
    let mut sorted: Vec<&OriginBatchRow> = batches.iter().collect();
    sorted.sort_by(|a, b| a.origin_batch_id.as_bytes().cmp(b.origin_batch_id.as_bytes()));
    sorted
}

pub fn render_breakdown_csv(batches: &[&OriginBatchRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if batches.is_empty() {
        writer.write_record([
            "origin_batch_id",
            "total_segments",
            "total_duration_min",
            "submitted_count",
            "submitted_duration_min",
            "transcribing_count",
            "transcribing_duration_min",
            "trashed_count",
            "trashed_duration_min",
        ])?;
    }
    for row in batches {
        writer.serialize(BreakdownRecord::from(*row))?;
    }
    finish(writer)
}

pub fn render_tasks_csv(tasks: &[TranscriptionTask]) -> Result<String> {
    let mut sorted: Vec<&TranscriptionTask> = tasks.iter().collect();
    sorted.sort_by(|a, b| {
        (a.origin_batch_id.as_bytes(), a.id.as_bytes())
            .cmp(&(b.origin_batch_id.as_bytes(), b.id.as_bytes()))
    });

    let mut writer = csv::Writer::from_writer(Vec::new());
    if sorted.is_empty() {
        writer.write_record([
            "id",
            "segment_name",
            "origin_batch_id",
            "status",
            "duration_seconds",
            "updated_at",
        ])?;
    }
    for task in sorted {
        writer.serialize(task)?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    // Every field written above is valid UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn render_markdown(
    aggregation: &Aggregation,
    batches: &[&OriginBatchRow],
    window: &AggregationWindow,
    run_date: NaiveDate,
) -> String {
    let weekly = &aggregation.weekly;
    let mut content = String::new();

    content.push_str("# STT Transcription Report\n\n");
    content.push_str(&format!("## Summary for {}\n\n", run_date.format("%Y-%m-%d")));
    content.push_str(&format!(
        "- **Date Range**: {} to {}\n",
        window.start().format("%Y-%m-%d"),
        window.end().format("%Y-%m-%d")
    ));
    content.push_str(&format!(
        "- **Total Transcribed Files**: {}\n",
        weekly.completed_count
    ));
    content.push_str(&format!(
        "- **Total Audio Duration**: {} hours\n",
        hours(weekly.total_duration_seconds)
    ));
    content.push_str(&format!(
        "- **Average File Duration**: {} minutes\n\n",
        minutes(weekly.average_duration_seconds)
    ));

    content.push_str("## Status Breakdown\n\n");
    content.push_str("| Status | Count | Duration (hours) |\n");
    content.push_str("|--------|-------|------------------|\n");
    for entry in aggregation.status.entries() {
        content.push_str(&format!(
            "| {} | {} | {} |\n",
            entry.status.label(),
            entry.count,
            hours(entry.duration_seconds)
        ));
    }
    content.push('\n');

    content.push_str("## Weekly Progress\n\n");
    content.push_str("| Metric | Value |\n");
    content.push_str("|--------|-------|\n");
    content.push_str(&format!(
        "| Completed Transcriptions | {} |\n",
        weekly.completed_count
    ));
    content.push_str(&format!(
        "| Processed Audio | {} hours |\n",
        hours(weekly.total_duration_seconds)
    ));
    content.push_str(&format!(
        "| Avg. Processing Time | {} minutes |\n\n",
        minutes(weekly.average_duration_seconds)
    ));

    content.push_str("## Origin Batch Breakdown\n\n");
    content.push_str(
        "| Origin Batch | Total Segments | Total Duration (min) \
         | Submitted Count | Submitted Duration (min) \
         | Transcribing Count | Transcribing Duration (min) \
         | Trashed Count | Trashed Duration (min) |\n",
    );
    content.push_str(
        "|--------------|----------------|----------------------\
         |-----------------|--------------------------\
         |--------------------|-----------------------------\
         |---------------|------------------------|\n",
    );
    for row in batches.iter().take(MARKDOWN_BATCH_LIMIT) {
        content.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            escape_cell(&row.origin_batch_id),
            row.total_segments,
            minutes(row.total_duration_seconds),
            row.submitted.count,
            minutes(row.submitted.duration_seconds),
            row.transcribing.count,
            minutes(row.transcribing.duration_seconds),
            row.trashed.count,
            minutes(row.trashed.duration_seconds),
        ));
    }

    let export = format!(
        "{}_{}.csv",
        BREAKDOWN_STEM,
        run_date.format(DATE_STAMP_FORMAT)
    );
    if batches.len() > MARKDOWN_BATCH_LIMIT {
        content.push_str(&format!(
            "\n*Note: Only showing the first {} of {} origin batches. See `{}` for the complete breakdown.*\n",
            MARKDOWN_BATCH_LIMIT,
            batches.len(),
            export
        ));
    } else {
        content.push_str(&format!(
            "\n*Full breakdown of {} origin batches: `{}`.*\n",
            batches.len(),
            export
        ));
    }

    content
}

fn hours(seconds: f64) -> String {
    format!("{:.2}", seconds / 3600.0)
}

fn minutes(seconds: f64) -> String {
    format!("{:.2}", seconds / 60.0)
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}
