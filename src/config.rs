use serde::Deserialize;
use sqlx::postgres::PgSslMode;
use std::str::FromStr;

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Schema holding the `period_data` table.
    pub db_schema: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Explicit TLS mode for the store connection. `None` defers to the URL,
    /// falling back to full verification.
    #[serde(skip)]
    pub db_ssl_mode: Option<PgSslMode>,
    /// Allowed CORS origins. Empty means any origin is reflected.
    pub cors_allowed_origins: Vec<String>,
    /// Requests allowed per client IP within one rate limit window.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub body_limit_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| validate_database_url(&url).map(|_| url))?,
            port: parse_var("PORT", 8080)?,
            db_schema: std::env::var("DB_SCHEMA")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "komunalka".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: parse_var("DB_ACQUIRE_TIMEOUT_SECS", 30)?,
            db_ssl_mode: std::env::var("DB_SSL_MODE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|mode| {
                    PgSslMode::from_str(mode.trim()).map_err(|_| {
                        anyhow::anyhow!(
                            "DB_SSL_MODE must be one of disable, allow, prefer, require, verify-ca, verify-full"
                        )
                    })
                })
                .transpose()?,
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            rate_limit_requests: parse_var("RATE_LIMIT_REQUESTS", 200)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", 60)?,
            body_limit_bytes: parse_var("BODY_LIMIT_BYTES", 1024 * 1024)?,
        };

        if config.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if config.rate_limit_requests == 0 || config.rate_limit_window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW_SECS must be positive");
        }

        // Never log the full URL, it carries credentials
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Schema: {}", config.db_schema);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Interval after which one rate limit token is replenished.
    pub fn rate_limit_replenish_ms(&self) -> u64 {
        (self.rate_limit_window_secs * 1000 / u64::from(self.rate_limit_requests)).max(1)
    }
}

fn validate_database_url(url: &str) -> anyhow::Result<()> {
    if url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL cannot be empty");
    }
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
    }
    Ok(())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
