use std::time::Duration;

use boardwatch_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required; `POSTGRES_URL` is accepted as a fallback)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 30)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("POSTGRES_URL"))
            .map_err(|_| {
                AppError::ConfigError(
                    "DATABASE_URL not set. Required for database operations.".into(),
                )
            })?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        let acquire_timeout = match std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            Err(_) => Duration::from_secs(30),
            Ok(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DATABASE_ACQUIRE_TIMEOUT_SECS '{raw}': must be a whole number of seconds"
                ))
            })?,
        };

        Ok(Self {
            url,
            max_connections,
            acquire_timeout,
        })
    }
}
