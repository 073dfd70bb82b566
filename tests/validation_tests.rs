/// Unit tests for upsert batch validation
/// Tests the strict policy: one bad record rejects the batch before any store work
use komunalka_api::validation::validate_batch;
use serde_json::json;

#[cfg(test)]
mod batch_tests {
    use super::*;

    #[test]
    fn test_valid_batch_keeps_order() {
        let records = validate_batch(json!([
            {"apartment_id": 5, "period": "2025-08", "item": "water", "curr_value": 12},
            {"apt_id": 5, "period": "2025-08", "item": "gas", "meta": {"unit": "m3"}}
        ]))
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item, "water");
        assert_eq!(records[1].item, "gas");
        assert_eq!(records[1].meta, Some(json!({"unit": "m3"})));
    }

    #[test]
    fn test_negative_apartment_rejects_batch() {
        let err = validate_batch(json!([
            {"apartment_id": 5, "period": "2025-08", "item": "water"},
            {"apartment_id": -2, "period": "2025-08", "item": "water"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_missing_period_rejects_batch() {
        let err = validate_batch(json!([{"apartment_id": 5, "item": "water"}])).unwrap_err();
        assert!(err.to_string().contains("period is required"));
    }

    #[test]
    fn test_non_object_record_rejected() {
        let err = validate_batch(json!([42])).unwrap_err();
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn test_non_string_item_rejected() {
        let err = validate_batch(json!([{"apartment_id": 5, "period": "2025-08", "item": 3}]))
            .unwrap_err();
        assert!(err.to_string().contains("item must be a string"));
    }
}

#[cfg(test)]
mod meta_tests {
    use super::*;

    #[test]
    fn test_null_meta_is_absent() {
        let records = validate_batch(json!([
            {"apartment_id": 1, "period": "2025-01", "item": "gas", "meta": null}
        ]))
        .unwrap();
        assert_eq!(records[0].meta, None);
    }

    #[test]
    fn test_nested_meta_untouched() {
        let meta = json!({"a": [1, {"b": null}], "c": "text", "d": 1.25});
        let records = validate_batch(json!([
            {"apartment_id": 1, "period": "2025-01", "item": "gas", "meta": meta.clone()}
        ]))
        .unwrap();
        assert_eq!(records[0].meta, Some(meta));
    }
}
