use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, info};

use crate::core::database::models::{
    OriginBatchRow, StatusTotal, TaskStatus, TranscriptionTask, WindowTotals,
};
use crate::core::error::{ReportError, Result};

/// Inclusive calendar-day range that scopes the weekly summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl AggregationWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(ReportError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// The last `days` calendar days ending on `end`, `end` included.
    ///
    /// Consecutive runs `days` apart cover adjacent, non-overlapping windows.
    pub fn lookback(end: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(ReportError::Config(
                "lookback must cover at least one day".to_string(),
            ));
        }
        let start = end
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| ReportError::Config(format!("cannot look back {} days", days)))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Half-open UTC bounds: midnight of `start` up to midnight after `end`.
    pub fn utc_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let lower = self.start.and_time(chrono::NaiveTime::MIN).and_utc();
        let upper = self
            .end
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (lower, upper)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let (lower, upper) = self.utc_bounds();
        at >= lower && at < upper
    }
}

/// Where task aggregates come from. Each call is one read over the task records.
#[allow(async_fn_in_trait)]
pub trait TaskSource {
    /// All-time count and duration per status.
    async fn status_totals(&mut self) -> Result<Vec<StatusTotal>>;

    /// Count and duration of tasks inside `window`. An empty `completed` accepts any status.
    async fn window_totals(
        &mut self,
        window: &AggregationWindow,
        completed: &[TaskStatus],
    ) -> Result<WindowTotals>;

    /// All-time per-origin-batch breakdown.
    async fn batch_breakdown(&mut self) -> Result<Vec<OriginBatchRow>>;

    async fn tasks(&mut self) -> Result<Vec<TranscriptionTask>>;
}

/// Per-status totals in report order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusBreakdown {
    entries: Vec<StatusTotal>,
}

impl StatusBreakdown {
    /// Merge raw totals; the named statuses are always present, others follow by name.
    pub fn from_totals(totals: Vec<StatusTotal>) -> Self {
        let mut entries: Vec<StatusTotal> = TaskStatus::NAMED
            .iter()
            .map(|status| StatusTotal {
                status: status.clone(),
                count: 0,
                duration_seconds: 0.0,
            })
            .collect();

        for total in totals {
            match entries.iter_mut().find(|e| e.status == total.status) {
                Some(entry) => {
                    entry.count += total.count;
                    entry.duration_seconds += total.duration_seconds;
                }
                None => entries.push(total),
            }
        }

        entries.sort_by(|a, b| a.status.cmp(&b.status));
        Self { entries }
    }

    pub fn entries(&self) -> &[StatusTotal] {
        &self.entries
    }

    pub fn get(&self, status: &TaskStatus) -> Option<&StatusTotal> {
        self.entries.iter().find(|e| &e.status == status)
    }

    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.entries.iter().map(|e| e.duration_seconds).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeeklySummary {
    pub completed_count: u64,
    pub total_duration_seconds: f64,
    pub average_duration_seconds: f64,
}

impl WeeklySummary {
    pub fn from_totals(totals: WindowTotals) -> Self {
        if totals.count == 0 {
            return Self::default();
        }
        Self {
            completed_count: totals.count,
            total_duration_seconds: totals.duration_seconds,
            average_duration_seconds: totals.duration_seconds / totals.count as f64,
        }
    }
}

/// Which tasks the weekly summary counts as completed.
#[derive(Debug, Clone, Default)]
pub struct CompletionPolicy {
    pub statuses: Vec<TaskStatus>,
}

impl CompletionPolicy {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            statuses: names.iter().map(|n| TaskStatus::parse(n.as_ref())).collect(),
        }
    }
}

/// Everything one run reports on.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub status: StatusBreakdown,
    pub weekly: WeeklySummary,
    pub batches: Vec<OriginBatchRow>,
    /// Raw rows, only collected when the task export is enabled.
    pub tasks: Option<Vec<TranscriptionTask>>,
}

pub async fn aggregate<S: TaskSource>(
    source: &mut S,
    window: &AggregationWindow,
    policy: &CompletionPolicy,
    include_tasks: bool,
) -> Result<Aggregation> {
    info!("Querying status totals...");
    let status = StatusBreakdown::from_totals(source.status_totals().await?);
    info!(
        "Status totals cover {} tasks across {} statuses",
        status.total_count(),
        status.entries().len()
    );

    info!(
        "Querying window totals for {} to {}...",
        window.start(),
        window.end()
    );
    let weekly = WeeklySummary::from_totals(source.window_totals(window, &policy.statuses).await?);
    info!("Window contains {} completed tasks", weekly.completed_count);

    info!("Querying origin batch breakdown...");
    let batches = source.batch_breakdown().await?;
    info!("Breakdown returned {} origin batches", batches.len());

    let tasks = if include_tasks {
        let tasks = source.tasks().await?;
        info!("Task export returned {} records", tasks.len());
        Some(tasks)
    } else {
        None
    };

    let aggregation = Aggregation {
        status,
        weekly,
        batches,
        tasks,
    };
    check(&aggregation)?;
    Ok(aggregation)
}

fn check(aggregation: &Aggregation) -> Result<()> {
    let negative = |value: f64| value < 0.0 || value.is_nan();

    for entry in aggregation.status.entries() {
        if negative(entry.duration_seconds) {
            return Err(ReportError::InvalidData(format!(
                "status {} has duration {}",
                entry.status, entry.duration_seconds
            )));
        }
    }

    if negative(aggregation.weekly.total_duration_seconds) {
        return Err(ReportError::InvalidData(format!(
            "window duration is {}",
            aggregation.weekly.total_duration_seconds
        )));
    }

    for row in &aggregation.batches {
        if negative(row.total_duration_seconds) || row.named_count() > row.total_segments {
            return Err(ReportError::InvalidData(format!(
                "origin batch {} is inconsistent: {} segments, {} in named statuses, {}s",
                row.origin_batch_id,
                row.total_segments,
                row.named_count(),
                row.total_duration_seconds
            )));
        }
        if row.unclassified_count() > 0 {
            debug!(
                "Origin batch {} has {} segments outside the named statuses",
                row.origin_batch_id,
                row.unclassified_count()
            );
        }
    }

    Ok(())
}
