use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::DatabaseConfig;
use crate::core::error::{ReportError, Result};

pub mod memory;
pub mod models;
pub mod repository;

/// A single read connection, held for one report run.
pub struct Database {
    conn: PgConnection,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        info!(
            "Connecting to database {} on {}:{}",
            options.get_database().unwrap_or("<default>"),
            options.get_host(),
            options.get_port()
        );

        let conn = tokio::time::timeout(timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                ReportError::Connection(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection after {}s", timeout.as_secs()),
                )))
            })?
            .map_err(ReportError::Connection)?;

        info!("Database connection successful");
        Ok(Self { conn })
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Release the connection. A failed close does not change the run's outcome.
    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            warn!("Failed to close database connection cleanly: {}", e);
        }
    }
}

/// Build connection options from a URL or from the individual fields.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if let Some(url) = &config.url {
        return url
            .parse::<PgConnectOptions>()
            .map_err(|e| ReportError::Config(format!("invalid database url: {}", e)));
    }

    let required = |name: &str, value: &Option<String>| {
        value
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ReportError::Config(format!("database {} not set", name)))
    };

    let mut options = PgConnectOptions::new()
        .host(&required("host", &config.host)?)
        .port(config.port)
        .database(&required("dbname", &config.dbname)?)
        .username(&required("user", &config.user)?);
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_fields() {
        let config = DatabaseConfig {
            host: Some("db.internal".to_string()),
            port: 6543,
            dbname: Some("stt".to_string()),
            user: Some("reporter".to_string()),
            password: Some("secret".to_string()),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("stt"));
        assert_eq!(options.get_username(), "reporter");
    }

    #[test]
    fn test_url_wins_over_fields() {
        let config = DatabaseConfig {
            url: Some("postgres://reporter:pw@warehouse:5433/stt_prod".to_string()),
            host: Some("ignored".to_string()),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "warehouse");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("stt_prod"));
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let config = DatabaseConfig {
            dbname: Some("stt".to_string()),
            user: Some("reporter".to_string()),
            ..DatabaseConfig::default()
        };
        let err = connect_options(&config).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
