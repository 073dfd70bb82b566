use crate::db_storage::PeriodDataStorage;
use crate::errors::AppError;
use crate::models::*;
use crate::validation::{parse_apartment_id_param, parse_period_param, validate_batch};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Period record storage, owning the process-wide connection pool.
    pub storage: PeriodDataStorage,
}

/// GET /
///
/// Plain-text banner, handy for load balancer health checks that don't parse JSON.
pub async fn root() -> &'static str {
    "komunalka-api is running"
}

/// GET /health
///
/// Round-trips `SELECT now()` against the store.
///
/// # Returns
///
/// * `(StatusCode, Json<HealthResponse>)` - 200 with the store's clock, or 500
///   with the error description.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.storage.now().await {
        Ok(now) => (
            StatusCode::OK,
            Json(HealthResponse {
                ok: true,
                status: "ok".to_string(),
                now: Some(now),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    ok: false,
                    status: "error".to_string(),
                    now: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// POST /api/period_data/upsert
///
/// Inserts or overwrites a batch of period records. The batch is validated
/// up front and written in a single transaction, so a request either applies
/// every record or none of them.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `payload` - JSON array of records.
///
/// # Returns
///
/// * `Result<Json<UpsertResponse>, AppError>` - Number of records written, or
///   400 for invalid input / rejected data, 500 for store failures.
pub async fn upsert_period_data(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<UpsertResponse>, AppError> {
    let Json(body) = payload.map_err(|e| match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(e.body_text()),
        _ => AppError::BadRequest(e.body_text()),
    })?;
    let records = validate_batch(body)?;

    tracing::info!("POST /period_data/upsert - {} records", records.len());

    if records.is_empty() {
        return Ok(Json(UpsertResponse { updated: 0 }));
    }

    let updated = state.storage.upsert_batch(&records).await?;

    Ok(Json(UpsertResponse { updated }))
}

/// GET /api/period_data?period=&apartment_id=
///
/// Item records of one apartment in one period, ordered by item.
pub async fn get_period_data(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PeriodQueryParams>, QueryRejection>,
) -> Result<Json<Vec<PeriodRecord>>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if params.period.is_none() || params.apartment_id.is_none() {
        return Err(AppError::BadRequest(
            "period and apartment_id are required".to_string(),
        ));
    }
    let period = parse_period_param(params.period.as_deref())?;
    let apartment_id = parse_apartment_id_param(params.apartment_id.as_deref())?;

    tracing::debug!("GET /period_data - apartment {} period {}", apartment_id, period);

    let records = state.storage.find_by_key(apartment_id, &period).await?;
    Ok(Json(records))
}

/// GET /api/period_data/last?apartment_id=
///
/// Latest period recorded for an apartment. Clients use it to pre-fill the
/// "previous reading" fields of a new period. `{"period": null}` when the
/// apartment has no records yet.
pub async fn get_last_period(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LastPeriodQueryParams>, QueryRejection>,
) -> Result<Json<LastPeriodResponse>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let apartment_id = parse_apartment_id_param(params.apartment_id.as_deref())?;

    let period = state.storage.last_period(apartment_id).await?;
    Ok(Json(LastPeriodResponse { period }))
}

/// GET /api/period_data/list
pub async fn list_period_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PeriodRecord>>, AppError> {
    let records = state.storage.list_all().await?;
    tracing::debug!("GET /period_data/list - {} records", records.len());
    Ok(Json(records))
}
