use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;

use crate::core::aggregate::{aggregate, Aggregation, AggregationWindow, CompletionPolicy};
use crate::core::config::Config;
use crate::core::database::memory::MemoryTaskSource;
use crate::core::database::repository::PgTaskSource;
use crate::core::database::Database;
use crate::core::error::Result;
use crate::core::output::ReportWriter;
use crate::core::report;

/// Everything one report run needs. Nothing is read from hidden state.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: Config,
    pub window: AggregationWindow,
    pub run_date: NaiveDate,
    /// Aggregate a task export instead of querying the database.
    pub tasks_csv: Option<PathBuf>,
}

/// One full pass: aggregate, render, write. Returns the files written.
pub async fn run(options: &RunOptions) -> Result<Vec<PathBuf>> {
    let config = &options.config;
    config.validate(options.tasks_csv.is_some())?;

    let policy = CompletionPolicy::from_names(&config.report.completed_statuses);
    let export_tasks = config.report.export_tasks;

    let aggregation = match &options.tasks_csv {
        Some(path) => {
            let mut source = MemoryTaskSource::from_csv_path(path)?
                .with_origin_pattern(config.schema.origin_pattern()?);
            aggregate(&mut source, &options.window, &policy, export_tasks).await?
        }
        None => collect_from_database(config, &options.window, &policy).await?,
    };

    info!("Rendering report for {}", options.run_date);
    let rendered = report::render(&aggregation, &options.window, options.run_date)?;

    ReportWriter::new(&config.report.output_dir)
        .replace_existing(config.report.replace_existing)
        .write(&rendered)
}

/// The connection is closed on every path before the result is inspected.
async fn collect_from_database(
    config: &Config,
    window: &AggregationWindow,
    policy: &CompletionPolicy,
) -> Result<Aggregation> {
    let db = Database::connect(&config.database).await?;
    let mut source = PgTaskSource::new(db, config.schema.clone());

    let result: Result<Aggregation> = async {
        source.validate_schema().await?;
        aggregate(&mut source, window, policy, config.report.export_tasks).await
    }
    .await;

    source.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TASKS_CSV: &str = "\
id,segment_name,origin_batch_id,status,duration_seconds,updated_at
1,STT_GR_0002_0001_0_to_6000,STT_GR_0002,submitted,6,2025-06-20T08:00:00Z
2,STT_GR_0001_0001_0_to_9000,STT_GR_0001,transcribing,9,2025-06-21T08:00:00Z
3,STT_GR_0001_0002_9000_to_12000,STT_GR_0001,trashed,3,2025-01-02T08:00:00Z
";

    fn options(dir: &std::path::Path) -> RunOptions {
        let mut config = Config::default();
        config.report.output_dir = dir.join("reports");
        config.report.export_tasks = true;
        let input = dir.join("tasks.csv");
        fs::write(&input, TASKS_CSV).unwrap();

        let run_date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        RunOptions {
            config,
            window: AggregationWindow::lookback(run_date, 19).unwrap(),
            run_date,
            tasks_csv: Some(input),
        }
    }

    #[tokio::test]
    async fn test_offline_run_writes_all_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path());
        let written = run(&options).await.unwrap();
        assert_eq!(written.len(), 6);

        let out = tmp.path().join("reports");
        let breakdown = fs::read_to_string(out.join("original_id_breakdown_latest.csv")).unwrap();
        let ids: Vec<&str> = breakdown
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(ids, vec!["STT_GR_0001", "STT_GR_0002"]);

        let markdown = fs::read_to_string(out.join("summary_report_20250701.md")).unwrap();
        assert!(markdown.contains("- **Date Range**: 2025-06-13 to 2025-07-01"));
        assert!(markdown.contains("- **Total Transcribed Files**: 2"));

        let tasks = fs::read_to_string(out.join("transcription_data_latest.csv")).unwrap();
        assert!(tasks.starts_with("id,segment_name,origin_batch_id,"));
        assert!(tasks.contains("2,STT_GR_0001_0001_0_to_9000,STT_GR_0001,transcribing,9.0,"));
    }

    #[tokio::test]
    async fn test_online_run_without_credentials_fails_before_connecting() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = options(tmp.path());
        options.tasks_csv = None;
        let err = run(&options).await.unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(!tmp.path().join("reports").exists());
    }
}
