//! Utility to inspect the period data table and print its columns.

use komunalka_api::config::Config;
use komunalka_api::db::{connect_options, is_valid_identifier};
use sqlx::postgres::PgPoolOptions;

/// Main entry point for the schema inspection utility.
///
/// Connects with the service configuration and lists the columns of
/// `<DB_SCHEMA>.period_data`, or reports that the table has not been
/// bootstrapped yet.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    if !is_valid_identifier(&config.db_schema) {
        anyhow::bail!("DB_SCHEMA '{}' is not a valid SQL identifier", config.db_schema);
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(&config)?)
        .await?;

    let columns: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = 'period_data' ORDER BY ordinal_position",
    )
    .bind(&config.db_schema)
    .fetch_all(&pool)
    .await?;

    if columns.is_empty() {
        println!(
            "{}.period_data does not exist yet; start the server to bootstrap it",
            config.db_schema
        );
        return Ok(());
    }

    println!("{}.period_data:", config.db_schema);
    for (col, type_, nullable) in columns {
        let null = if nullable == "YES" { "" } else { " not null" };
        println!("  - {}: {}{}", col, type_, null);
    }

    let (rows,): (i64,) = sqlx::query_as(&format!(
        "SELECT count(*) FROM {}.period_data",
        config.db_schema
    ))
    .fetch_one(&pool)
    .await?;
    println!("  {} records", rows);

    pool.close().await;
    Ok(())
}
