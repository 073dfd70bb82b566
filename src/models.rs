use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

// ============ Database Models ============

/// One stored line of a billing period: a single utility item of one
/// apartment in one period.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct PeriodRecord {
    /// Apartment the record belongs to.
    pub apartment_id: i64,
    /// Billing period label, `YYYY-MM` by convention.
    pub period: String,
    /// Utility item name (e.g. "water", "electricity").
    pub item: String,
    /// Previous meter reading.
    pub prev_value: Option<BigDecimal>,
    /// Current meter reading.
    pub curr_value: Option<BigDecimal>,
    /// Tariff rate.
    pub tariff: Option<BigDecimal>,
    /// Computed amount.
    pub amount: Option<BigDecimal>,
    /// Opaque client metadata, stored as JSONB.
    pub meta: Option<Value>,
    /// Timestamp of the first write for this key.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last write for this key.
    pub updated_at: DateTime<Utc>,
}

/// A validated record, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPeriodRecord {
    pub apartment_id: i64,
    pub period: String,
    pub item: String,
    pub prev_value: Option<BigDecimal>,
    pub curr_value: Option<BigDecimal>,
    pub tariff: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub meta: Option<Value>,
}

// ============ API Request Models ============

/// A record as submitted to the upsert endpoint, before validation.
///
/// Fields are kept as raw JSON so validation can name the offending field
/// instead of surfacing a serde message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodRecordInput {
    #[serde(default, alias = "apt_id")]
    pub apartment_id: Value,
    #[serde(default)]
    pub period: Value,
    #[serde(default)]
    pub item: Value,
    #[serde(default)]
    pub prev_value: Value,
    #[serde(default)]
    pub curr_value: Value,
    #[serde(default)]
    pub tariff: Value,
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub meta: Option<Value>,
}

/// Query parameters of `GET /api/period_data`.
#[derive(Debug, Deserialize)]
pub struct PeriodQueryParams {
    pub period: Option<String>,
    pub apartment_id: Option<String>,
}

/// Query parameters of `GET /api/period_data/last`.
#[derive(Debug, Deserialize)]
pub struct LastPeriodQueryParams {
    pub apartment_id: Option<String>,
}

// ============ API Response Models ============

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UpsertResponse {
    /// Number of records written.
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LastPeriodResponse {
    /// Most recent period of the apartment, `null` when it has none.
    pub period: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
