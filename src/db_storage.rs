use crate::db::is_valid_identifier;
use crate::errors::{AppError, ResultExt};
use crate::models::{NewPeriodRecord, PeriodRecord};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const RECORD_COLUMNS: &str = "apartment_id, period, item, prev_value, curr_value, tariff, \
                              amount, meta, created_at, updated_at";

/// Database storage for period records.
#[derive(Clone)]
pub struct PeriodDataStorage {
    pool: PgPool,
    /// Schema-qualified table name, e.g. `komunalka.period_data`.
    table: String,
}

impl PeriodDataStorage {
    pub fn new(pool: PgPool, schema: &str) -> Result<Self, AppError> {
        if !is_valid_identifier(schema) {
            return Err(AppError::InternalError(format!(
                "invalid schema name '{}'",
                schema
            )));
        }
        Ok(Self {
            pool,
            table: format!("{}.period_data", schema),
        })
    }

    /// Writes a validated batch in one transaction: either every record is
    /// applied or none is.
    ///
    /// Each row is a single `INSERT .. ON CONFLICT DO UPDATE`, so concurrent
    /// writers to the same key never race between a read and a write. The
    /// identity columns and `created_at` are never touched by the update.
    pub async fn upsert_batch(&self, records: &[NewPeriodRecord]) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            r#"
            INSERT INTO {}
                (apartment_id, period, item, prev_value, curr_value, tariff, amount, meta, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            ON CONFLICT (apartment_id, period, item) DO UPDATE SET
                prev_value = EXCLUDED.prev_value,
                curr_value = EXCLUDED.curr_value,
                tariff     = EXCLUDED.tariff,
                amount     = EXCLUDED.amount,
                meta       = EXCLUDED.meta,
                updated_at = now()
            "#,
            self.table
        );

        let mut tx = self.pool.begin().await?;

        for record in records {
            let result = sqlx::query(&sql)
                .bind(record.apartment_id)
                .bind(&record.period)
                .bind(&record.item)
                .bind(&record.prev_value)
                .bind(&record.curr_value)
                .bind(&record.tariff)
                .bind(&record.amount)
                .bind(&record.meta)
                .execute(&mut *tx)
                .await;

            if let Err(e) = result {
                tracing::error!(
                    "Upsert failed for apartment {} period {} item {}: {}",
                    record.apartment_id,
                    record.period,
                    record.item,
                    e
                );
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback_err);
                }
                return Err(AppError::from_write_error(e));
            }
        }

        tx.commit().await.map_err(AppError::from_write_error)?;

        tracing::info!("Upserted {} period records", records.len());
        Ok(records.len())
    }

    /// Every record, ordered by period, then apartment, then item.
    pub async fn list_all(&self) -> Result<Vec<PeriodRecord>, AppError> {
        let records = sqlx::query_as::<_, PeriodRecord>(&format!(
            "SELECT {} FROM {} ORDER BY period ASC, apartment_id ASC, item ASC",
            RECORD_COLUMNS, self.table
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing period data")?;

        Ok(records)
    }

    /// Item records of one apartment in one period, ordered by item.
    pub async fn find_by_key(
        &self,
        apartment_id: i64,
        period: &str,
    ) -> Result<Vec<PeriodRecord>, AppError> {
        let records = sqlx::query_as::<_, PeriodRecord>(&format!(
            "SELECT {} FROM {} WHERE apartment_id = $1 AND period = $2 ORDER BY item ASC",
            RECORD_COLUMNS, self.table
        ))
        .bind(apartment_id)
        .bind(period)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading period {} of apartment {}", period, apartment_id))?;

        Ok(records)
    }

    /// Greatest period label stored for the apartment, if any.
    pub async fn last_period(&self, apartment_id: i64) -> Result<Option<String>, AppError> {
        let period = sqlx::query_scalar::<_, Option<String>>(&format!(
            "SELECT MAX(period) FROM {} WHERE apartment_id = $1",
            self.table
        ))
        .bind(apartment_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("looking up last period of apartment {}", apartment_id))?;

        Ok(period)
    }

    /// Store clock, used by the health check as a round trip.
    pub async fn now(&self) -> Result<DateTime<Utc>, sqlx::Error> {
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()")
            .fetch_one(&self.pool)
            .await
    }
}
