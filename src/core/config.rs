use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::database::models::OriginPattern;
use crate::core::error::{ReportError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub schema: SchemaConfig,
    pub report: ReportConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; wins over the individual fields when set.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
}

/// Where the task records live and what their columns are called.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub schema: Option<String>,
    pub table: String,
    pub id_column: String,
    pub origin_column: String,
    /// Regex turning a segment name into its origin batch key. Unanchored
    /// patterns match anywhere in the name, in Rust and in Postgres alike.
    pub origin_pattern: Option<String>,
    pub status_column: String,
    pub duration_column: String,
    pub timestamp_column: String,
    pub group_column: Option<String>,
    pub group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub lookback_days: u32,
    /// Statuses counted as completed in the weekly summary. Empty means all.
    pub completed_statuses: Vec<String>,
    pub export_tasks: bool,
    pub replace_existing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: 5432,
            dbname: None,
            user: None,
            password: None,
            connect_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            schema: None,
            table: "Task".to_string(),
            id_column: "id".to_string(),
            origin_column: "file_name".to_string(),
            origin_pattern: Some(r"^(STT_GR_\d+)_".to_string()),
            status_column: "state".to_string(),
            duration_column: "audio_duration".to_string(),
            timestamp_column: "updated_at".to_string(),
            group_column: Some("group_id".to_string()),
            group_ids: vec![32, 33],
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            lookback_days: 7,
            completed_statuses: Vec::new(),
            export_tasks: false,
            replace_existing: false,
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| ReportError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checked once at startup so a bad column name never reaches a query.
    pub fn validate(&self, offline: bool) -> Result<()> {
        self.schema.validate()?;

        if !offline && self.database.url.is_none() {
            let missing: Vec<&str> = [
                ("host", &self.database.host),
                ("dbname", &self.database.dbname),
                ("user", &self.database.user),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(ReportError::Config(format!(
                    "database {} not set (use DATABASE_URL or HOST/DBNAME/DBUSER/PASSWORD)",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<()> {
        let mut names = vec![
            ("table", self.table.as_str()),
            ("id_column", self.id_column.as_str()),
            ("origin_column", self.origin_column.as_str()),
            ("status_column", self.status_column.as_str()),
            ("duration_column", self.duration_column.as_str()),
            ("timestamp_column", self.timestamp_column.as_str()),
        ];
        if let Some(schema) = &self.schema {
            names.push(("schema", schema.as_str()));
        }
        if let Some(group) = &self.group_column {
            names.push(("group_column", group.as_str()));
        }

        for (field, value) in names {
            if !is_identifier(value) {
                return Err(ReportError::Config(format!(
                    "schema.{} {:?} is not a plain SQL identifier",
                    field, value
                )));
            }
        }

        if !self.group_ids.is_empty() && self.group_column.is_none() {
            return Err(ReportError::Config(
                "schema.group_ids requires schema.group_column".to_string(),
            ));
        }

        self.origin_pattern()?;
        Ok(())
    }

    pub fn origin_pattern(&self) -> Result<Option<OriginPattern>> {
        self.origin_pattern
            .as_deref()
            .map(OriginPattern::new)
            .transpose()
    }

    /// Every column the queries touch, in the order they are checked.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.id_column.as_str(),
            self.origin_column.as_str(),
            self.status_column.as_str(),
            self.duration_column.as_str(),
            self.timestamp_column.as_str(),
        ];
        if let Some(group) = &self.group_column {
            columns.push(group.as_str());
        }
        columns
    }

    /// Only the group filter is active when both a column and ids are configured.
    pub fn group_filter(&self) -> Option<(&str, &[i64])> {
        match &self.group_column {
            Some(column) if !self.group_ids.is_empty() => {
                Some((column.as_str(), self.group_ids.as_slice()))
            }
            _ => None,
        }
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_task_table() {
        let config = Config::default();
        assert_eq!(config.schema.table, "Task");
        assert_eq!(config.schema.status_column, "state");
        assert_eq!(config.schema.group_filter(), Some(("group_id", &[32, 33][..])));
        assert_eq!(config.report.output_dir, PathBuf::from("reports"));
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_default_origin_pattern_is_prefix_only() {
        let pattern = SchemaConfig::default().origin_pattern().unwrap().unwrap();
        assert_eq!(pattern.extract("STT_GR_0001_0003_22300_to_27800"), "STT_GR_0001");
        assert_eq!(
            pattern.extract("retake_STT_GR_0001_0003_0_to_5500"),
            "retake_STT_GR_0001_0003_0_to_5500"
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [schema]
            table = "transcription_tasks"
            group_ids = []

            [report]
            lookback_days = 14
            completed_statuses = ["submitted"]
            "#,
        )
        .unwrap();

        assert_eq!(config.schema.table, "transcription_tasks");
        assert_eq!(config.schema.duration_column, "audio_duration");
        assert_eq!(config.schema.group_filter(), None);
        assert_eq!(config.report.lookback_days, 14);
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_rejects_unsafe_identifier() {
        let mut config = Config::default();
        config.schema.status_column = "state; DROP TABLE x".to_string();
        let err = config.validate(true).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_rejects_bad_origin_pattern() {
        let mut config = Config::default();
        config.schema.origin_pattern = Some("(STT_GR_".to_string());
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_online_run_requires_credentials() {
        let mut config = Config::default();
        assert!(config.validate(false).is_err());

        config.database.host = Some("db.internal".to_string());
        config.database.dbname = Some("stt".to_string());
        config.database.user = Some("reporter".to_string());
        assert!(config.validate(false).is_ok());

        let mut config = Config::default();
        config.database.url = Some("postgres://reporter@db/stt".to_string());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = DatabaseConfig::default();
        config.password = Some("hunter2".to_string());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
