use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use stt_report::app::{self, RunOptions};
use stt_report::core::aggregate::AggregationWindow;
use stt_report::core::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for report artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of days in the window, ending on the run date
    #[arg(short, long, conflicts_with = "from")]
    days: Option<u32>,

    /// First day of the window (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// Last day of the window (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Date stamped on the report; defaults to today
    #[arg(long)]
    run_date: Option<NaiveDate>,

    /// Replace artifacts already written for this run date
    #[arg(long)]
    replace: bool,

    /// Also export the raw task rows
    #[arg(long)]
    export_tasks: bool,

    /// Aggregate a task export instead of querying the database
    #[arg(long)]
    tasks_csv: Option<PathBuf>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "HOST")]
    host: Option<String>,

    #[arg(long, env = "DBPORT")]
    port: Option<u16>,

    #[arg(long, env = "DBNAME")]
    dbname: Option<String>,

    #[arg(long, env = "DBUSER")]
    user: Option<String>,

    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Args {
    /// Flags and environment override the config file.
    fn apply(&self, config: &mut Config) {
        let db = &mut config.database;
        if self.database_url.is_some() {
            db.url = self.database_url.clone();
        }
        if self.host.is_some() {
            db.host = self.host.clone();
        }
        if let Some(port) = self.port {
            db.port = port;
        }
        if self.dbname.is_some() {
            db.dbname = self.dbname.clone();
        }
        if self.user.is_some() {
            db.user = self.user.clone();
        }
        if self.password.is_some() {
            db.password = self.password.clone();
        }

        let report = &mut config.report;
        if let Some(dir) = &self.output_dir {
            report.output_dir = dir.clone();
        }
        if let Some(days) = self.days {
            report.lookback_days = days;
        }
        report.replace_existing |= self.replace;
        report.export_tasks |= self.export_tasks;
    }

    fn window(&self, config: &Config, run_date: NaiveDate) -> Result<AggregationWindow> {
        let window = match (self.from, self.to) {
            (Some(from), Some(to)) => AggregationWindow::new(from, to)?,
            (None, Some(to)) => AggregationWindow::lookback(to, config.report.lookback_days)?,
            _ => AggregationWindow::lookback(run_date, config.report.lookback_days)?,
        };
        Ok(window)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stt_report=info".into()),
        )
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    info!("Starting STT report generation...");

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config);

    let run_date = args.run_date.unwrap_or_else(|| Local::now().date_naive());
    let window = args.window(&config, run_date)?;

    let options = RunOptions {
        config,
        window,
        run_date,
        tasks_csv: args.tasks_csv.clone(),
    };

    let written = app::run(&options).await.map_err(|e| {
        error!(kind = e.kind(), "Report generation failed: {}", e);
        e
    })?;

    info!(
        "Report generation completed successfully ({} files written)",
        written.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_explicit_window() {
        let args = Args::parse_from(["stt-report", "--from", "2025-06-13", "--to", "2025-07-01"]);
        let window = args.window(&Config::default(), date(2025, 7, 15)).unwrap();
        assert_eq!(window.start(), date(2025, 6, 13));
        assert_eq!(window.end(), date(2025, 7, 1));
    }

    #[test]
    fn test_lookback_from_run_date() {
        let args = Args::parse_from(["stt-report", "--days", "19"]);
        let mut config = Config::default();
        args.apply(&mut config);
        let window = args.window(&config, date(2025, 7, 1)).unwrap();
        assert_eq!(window.start(), date(2025, 6, 13));

        let weekly = Args::parse_from(["stt-report"]);
        let window = weekly.window(&Config::default(), date(2025, 7, 1)).unwrap();
        assert_eq!(window.start(), date(2025, 6, 25));
    }

    #[test]
    fn test_zero_day_lookback_is_an_error() {
        let args = Args::parse_from(["stt-report", "--days", "0"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert!(args.window(&config, date(2025, 7, 1)).is_err());
    }

    #[test]
    fn test_reversed_window_is_an_error() {
        let args = Args::parse_from(["stt-report", "--from", "2025-07-02", "--to", "2025-07-01"]);
        assert!(args.window(&Config::default(), date(2025, 7, 15)).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "stt-report",
            "--output-dir",
            "out",
            "--replace",
            "--export-tasks",
            "--database-url",
            "postgres://reporter@db/stt",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.report.output_dir, PathBuf::from("out"));
        assert!(config.report.replace_existing);
        assert!(config.report.export_tasks);
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://reporter@db/stt")
        );
    }

    #[test]
    fn test_from_without_to_is_rejected() {
        assert!(Args::try_parse_from(["stt-report", "--from", "2025-06-13"]).is_err());
    }
}
