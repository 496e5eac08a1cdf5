use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{debug, info};

use super::models::{
    OriginBatchRow, StatusSlice, StatusTotal, TaskStatus, TranscriptionTask, WindowTotals,
};
use super::Database;
use crate::core::aggregate::{AggregationWindow, TaskSource};
use crate::core::config::SchemaConfig;
use crate::core::error::{ReportError, Result};

/// Task source backed by the live task table. Read-only.
pub struct PgTaskSource {
    db: Database,
    schema: SchemaConfig,
}

impl PgTaskSource {
    /// `schema` must already have passed `SchemaConfig::validate`.
    pub fn new(db: Database, schema: SchemaConfig) -> Self {
        Self { db, schema }
    }

    pub async fn close(self) {
        self.db.close().await;
    }

    /// Fail fast when the table lacks a configured column.
    pub async fn validate_schema(&mut self) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name
            FROM information_schema.columns
            WHERE table_name = $1
              AND table_schema = COALESCE($2, current_schema())
            "#,
        )
        .bind(&self.schema.table)
        .bind(&self.schema.schema)
        .fetch_all(self.db.connection())
        .await
        .map_err(ReportError::from_query)?;

        let present: HashSet<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("column_name"))
            .collect::<std::result::Result<_, _>>()
            .map_err(ReportError::Query)?;

        let table = self.queries().table_ref();
        let missing = missing_columns(&self.schema.required_columns(), &present);
        if !missing.is_empty() {
            return Err(ReportError::Schema { table, missing });
        }

        info!("Table {} has all expected columns", table);
        Ok(())
    }

    fn queries(&self) -> TaskQueries<'_> {
        TaskQueries::new(&self.schema)
    }

    async fn fetch_all(&mut self, mut qb: QueryBuilder<'_, Postgres>) -> Result<Vec<PgRow>> {
        debug!("Running query: {}", qb.sql());
        qb.build()
            .fetch_all(self.db.connection())
            .await
            .map_err(ReportError::from_query)
    }
}

impl TaskSource for PgTaskSource {
    async fn status_totals(&mut self) -> Result<Vec<StatusTotal>> {
        let qb = self.queries().status_totals();
        let rows = self.fetch_all(qb).await?;
        rows.iter()
            .map(|row| {
                Ok(StatusTotal {
                    status: TaskStatus::parse(&get::<String>(row, "status")?),
                    count: count(row, "task_count")?,
                    duration_seconds: get(row, "duration_seconds")?,
                })
            })
            .collect()
    }

    async fn window_totals(
        &mut self,
        window: &AggregationWindow,
        completed: &[TaskStatus],
    ) -> Result<WindowTotals> {
        let qb = self.queries().window_totals(window, completed);
        let rows = self.fetch_all(qb).await?;
        let row = rows
            .first()
            .ok_or_else(|| ReportError::Query(sqlx::Error::RowNotFound))?;
        Ok(WindowTotals {
            count: count(row, "task_count")?,
            duration_seconds: get(row, "duration_seconds")?,
        })
    }

    async fn batch_breakdown(&mut self) -> Result<Vec<OriginBatchRow>> {
        let qb = self.queries().batch_breakdown();
        let rows = self.fetch_all(qb).await?;
        rows.iter()
            .map(|row| {
                let slice = |name: &str| -> Result<StatusSlice> {
                    Ok(StatusSlice {
                        count: count(row, &format!("{name}_count"))?,
                        duration_seconds: get(row, &format!("{name}_duration"))?,
                    })
                };
                Ok(OriginBatchRow {
                    origin_batch_id: get(row, "batch_id")?,
                    total_segments: count(row, "total_segments")?,
                    total_duration_seconds: get(row, "total_duration")?,
                    submitted: slice(TaskStatus::Submitted.as_str())?,
                    transcribing: slice(TaskStatus::Transcribing.as_str())?,
                    trashed: slice(TaskStatus::Trashed.as_str())?,
                })
            })
            .collect()
    }

    async fn tasks(&mut self) -> Result<Vec<TranscriptionTask>> {
        let qb = self.queries().tasks();
        let rows = self.fetch_all(qb).await?;
        rows.iter()
            .map(|row| {
                Ok(TranscriptionTask {
                    id: get(row, "id")?,
                    segment_name: get(row, "segment_name")?,
                    origin_batch_id: get(row, "origin_batch_id")?,
                    status: TaskStatus::parse(&get::<String>(row, "status")?),
                    duration_seconds: get(row, "duration_seconds")?,
                    updated_at: get::<Option<DateTime<Utc>>>(row, "updated_at")?,
                })
            })
            .collect()
    }
}

/// SQL for the report queries over the configured table and columns.
///
/// Identifiers are interpolated (quoted), values are always bound.
struct TaskQueries<'a> {
    schema: &'a SchemaConfig,
}

impl<'a> TaskQueries<'a> {
    fn new(schema: &'a SchemaConfig) -> Self {
        Self { schema }
    }

    fn table_ref(&self) -> String {
        match &self.schema.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.schema.table)),
            None => quote(&self.schema.table),
        }
    }

    fn status_expr(&self) -> String {
        format!(
            "COALESCE(lower(trim({}::text)), 'unknown')",
            quote(&self.schema.status_column)
        )
    }

    fn duration_expr(&self) -> String {
        format!("COALESCE({}::float8, 0)", quote(&self.schema.duration_column))
    }

    fn push_origin_expr(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        let column = quote(&self.schema.origin_column);
        qb.push(format!("COALESCE(substring({}::text FROM ", column));
        qb.push_bind(self.schema.origin_pattern.clone());
        qb.push(format!("), {}::text, '')", column));
    }

    fn push_from(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" FROM ");
        qb.push(self.table_ref());
        qb.push(" WHERE TRUE");
        if let Some((column, ids)) = self.schema.group_filter() {
            qb.push(format!(" AND {} = ANY(", quote(column)));
            qb.push_bind(ids.to_vec());
            qb.push(")");
        }
    }

    fn status_totals(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(format!(
            "{} AS status, COUNT(*) AS task_count, COALESCE(SUM({}), 0) AS duration_seconds",
            self.status_expr(),
            self.duration_expr()
        ));
        self.push_from(&mut qb);
        qb.push(" GROUP BY 1 ORDER BY 1");
        qb
    }

    fn window_totals(
        &self,
        window: &AggregationWindow,
        completed: &[TaskStatus],
    ) -> QueryBuilder<'static, Postgres> {
        let (lower, upper) = window.utc_bounds();
        let timestamp = quote(&self.schema.timestamp_column);

        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(format!(
            "COUNT(*) AS task_count, COALESCE(SUM({}), 0) AS duration_seconds",
            self.duration_expr()
        ));
        self.push_from(&mut qb);
        qb.push(format!(" AND {} >= ", timestamp));
        qb.push_bind(lower);
        qb.push(format!(" AND {} < ", timestamp));
        qb.push_bind(upper);
        if !completed.is_empty() {
            let statuses: Vec<String> = completed.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(format!(" AND {} = ANY(", self.status_expr()));
            qb.push_bind(statuses);
            qb.push(")");
        }
        qb
    }

    fn batch_breakdown(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT batch_id, COUNT(*) AS total_segments, ");
        qb.push("COALESCE(SUM(duration_seconds), 0) AS total_duration");
        for status in &TaskStatus::NAMED {
            let name = status.as_str();
            qb.push(format!(
                ", COUNT(*) FILTER (WHERE status = '{name}') AS {name}_count, \
                 COALESCE(SUM(duration_seconds) FILTER (WHERE status = '{name}'), 0) AS {name}_duration"
            ));
        }
        qb.push(" FROM (SELECT ");
        self.push_origin_expr(&mut qb);
        qb.push(format!(
            " AS batch_id, {} AS status, {} AS duration_seconds",
            self.status_expr(),
            self.duration_expr()
        ));
        self.push_from(&mut qb);
        qb.push(") AS tasks GROUP BY batch_id ORDER BY batch_id");
        qb
    }

    fn tasks(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(format!(
            "{}::text AS id, COALESCE({}::text, '') AS segment_name, ",
            quote(&self.schema.id_column),
            quote(&self.schema.origin_column)
        ));
        self.push_origin_expr(&mut qb);
        qb.push(format!(
            " AS origin_batch_id, {} AS status, {} AS duration_seconds, {}::timestamptz AS updated_at",
            self.status_expr(),
            self.duration_expr(),
            quote(&self.schema.timestamp_column)
        ));
        self.push_from(&mut qb);
        qb.push(" ORDER BY 3, 1");
        qb
    }
}

/// Required columns absent from `present`, in the order they were required.
fn missing_columns(required: &[&str], present: &HashSet<String>) -> Vec<String> {
    required
        .iter()
        .filter(|column| !present.contains(**column))
        .map(|column| column.to_string())
        .collect()
}

/// Quote an identifier that `SchemaConfig::validate` has already checked.
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(ReportError::Query)
}

fn count(row: &PgRow, column: &str) -> Result<u64> {
    let value: i64 = get(row, column)?;
    u64::try_from(value)
        .map_err(|_| ReportError::InvalidData(format!("{} is negative: {}", column, value)))
}
