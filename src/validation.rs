//! Shape checks for incoming period records and query parameters.
//!
//! Upserts are strict: one bad record rejects the whole batch before the
//! store is touched.

use crate::errors::AppError;
use crate::models::{NewPeriodRecord, PeriodRecordInput};
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::str::FromStr;

/// Validates an upsert body. It must be a JSON array; every element must
/// resolve to a complete key and well-formed numbers.
pub fn validate_batch(body: Value) -> Result<Vec<NewPeriodRecord>, AppError> {
    let items = match body {
        Value::Array(items) => items,
        other => {
            return Err(AppError::BadRequest(format!(
                "request body must be a JSON array of records, got {}",
                json_type_name(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            validate_record(item)
                .map_err(|msg| AppError::BadRequest(format!("record {}: {}", index, msg)))
        })
        .collect()
}

/// Validates a single record, returning a message naming the offending field.
pub fn validate_record(item: Value) -> Result<NewPeriodRecord, String> {
    if !item.is_object() {
        return Err(format!("expected an object, got {}", json_type_name(&item)));
    }
    let input: PeriodRecordInput = serde_json::from_value(item).map_err(|e| e.to_string())?;

    Ok(NewPeriodRecord {
        apartment_id: parse_apartment_id(&input.apartment_id)?,
        period: parse_label(&input.period, "period")?,
        item: parse_label(&input.item, "item")?,
        prev_value: parse_decimal(&input.prev_value, "prev_value")?,
        curr_value: parse_decimal(&input.curr_value, "curr_value")?,
        tariff: parse_decimal(&input.tariff, "tariff")?,
        amount: parse_decimal(&input.amount, "amount")?,
        meta: input.meta,
    })
}

/// Accepts a positive JSON integer or a string holding one.
pub fn parse_apartment_id(value: &Value) -> Result<i64, String> {
    const MSG: &str = "apartment_id must be a positive integer";

    let id = match value {
        Value::Number(n) => match n.as_i64() {
            Some(id) => id,
            None => match n.as_f64() {
                // 5.0 is still apartment 5
                Some(f) if f.fract() == 0.0 && f >= 1.0 && f < i64::MAX as f64 => f as i64,
                _ => return Err(MSG.to_string()),
            },
        },
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| MSG.to_string())?,
        Value::Null => return Err("apartment_id is required".to_string()),
        _ => return Err(MSG.to_string()),
    };

    if id <= 0 {
        return Err(MSG.to_string());
    }
    Ok(id)
}

/// Period and item: required, trimmed, non-empty strings.
fn parse_label(value: &Value, field: &str) -> Result<String, String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) | Value::Null => Err(format!("{} is required", field)),
        _ => Err(format!("{} must be a string", field)),
    }
}

/// Optional decimal. Absent, null and blank strings are all stored as NULL.
pub fn parse_decimal(value: &Value, field: &str) -> Result<Option<BigDecimal>, String> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().to_string(),
        // serde_json prints the shortest round-tripping form, so 0.1 stays 0.1
        Value::Number(n) => n.to_string(),
        _ => return Err(format!("{} must be a decimal number", field)),
    };

    BigDecimal::from_str(&raw)
        .map(Some)
        .map_err(|_| format!("{} must be a decimal number, got '{}'", field, raw))
}

/// Parses the `apartment_id` query parameter.
pub fn parse_apartment_id_param(raw: Option<&str>) -> Result<i64, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => {
            parse_apartment_id(&Value::String(s.to_string())).map_err(AppError::BadRequest)
        }
        None => Err(AppError::BadRequest("apartment_id is required".to_string())),
    }
}

/// Parses the `period` query parameter.
pub fn parse_period_param(raw: Option<&str>) -> Result<String, AppError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("period is required".to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
