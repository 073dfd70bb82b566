use crate::config::Config;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Arbitrary constant shared by every instance so that concurrent
/// bootstraps serialize on the same advisory lock.
const BOOTSTRAP_LOCK_KEY: i64 = 0x6b6f_6d75_6e61_6c6b;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Opens the connection pool and makes sure the `period_data` table exists.
    ///
    /// Any failure here is fatal for the caller: the service must not serve
    /// traffic against an unknown schema.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let options = connect_options(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
            .connect_with(options)
            .await?;

        ensure_schema(&pool, &config.db_schema).await?;

        Ok(Self { pool })
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}

/// Builds connect options, resolving the TLS mode: an explicit `DB_SSL_MODE`
/// wins, then an `sslmode` in the URL, then full certificate verification.
pub fn connect_options(config: &Config) -> anyhow::Result<PgConnectOptions> {
    let options = PgConnectOptions::from_str(&config.database_url)?;
    let mode = resolve_ssl_mode(config.db_ssl_mode, &config.database_url);

    match &mode {
        Some(PgSslMode::VerifyFull) | Some(PgSslMode::VerifyCa) => {
            tracing::info!("Store TLS: certificate verification enabled ({:?})", mode)
        }
        Some(other) => tracing::warn!(
            "Store TLS: certificate verification disabled ({:?}), only use on private networks",
            other
        ),
        None => tracing::debug!("Store TLS: using sslmode from DATABASE_URL"),
    }

    Ok(match mode {
        Some(mode) => options.ssl_mode(mode),
        None => options,
    })
}

/// `None` means the URL already names an sslmode and should be left alone.
fn resolve_ssl_mode(explicit: Option<PgSslMode>, url: &str) -> Option<PgSslMode> {
    match explicit {
        Some(mode) => Some(mode),
        None if url.contains("sslmode=") => None,
        None => Some(PgSslMode::VerifyFull),
    }
}

/// True for a plain, unquoted SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
        .is_match(name)
}

/// Creates the schema and the `period_data` table when absent.
///
/// Runs under a transaction-scoped advisory lock, so instances starting at the
/// same moment do not trip over each other's `IF NOT EXISTS` checks.
pub async fn ensure_schema(pool: &PgPool, schema: &str) -> anyhow::Result<()> {
    if !is_valid_identifier(schema) {
        anyhow::bail!("DB_SCHEMA '{}' is not a valid SQL identifier", schema);
    }

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.period_data (
            apartment_id BIGINT NOT NULL,
            period       TEXT NOT NULL,
            item         TEXT NOT NULL,
            prev_value   NUMERIC,
            curr_value   NUMERIC,
            tariff       NUMERIC,
            amount       NUMERIC,
            meta         JSONB,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (apartment_id, period, item)
        )
        "#,
        schema
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("Schema {}.period_data is ready", schema);
    Ok(())
}
