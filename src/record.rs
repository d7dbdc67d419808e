// src/record.rs
pub use serde_json::Value;

/// A structured record: an ordered mapping from field name to a dynamic value.
///
/// `serde_json` is built with `preserve_order`, so fields keep the order
/// in which they were parsed or inserted.
pub type Record = serde_json::Map<String, Value>;

/// Bytes a record contributes to a batch (its compact JSON encoding).
pub fn record_size(record: &Record) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0)
}

/// Convert a JSON value into a record, if it is an object.
pub fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parse a sample log: either a single JSON object or an array of objects.
pub fn records_from_sample(sample: &str) -> Result<Vec<Record>, String> {
    let value: Value =
        serde_json::from_str(sample.trim()).map_err(|e| format!("sample is not JSON: {}", e))?;

    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                into_record(item).ok_or_else(|| format!("sample item {} is not an object", i))
            })
            .collect(),
        other => Err(format!("sample must be an object, got {}", type_name(&other))),
    }
}

/// Short name of a value's type, used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_size_is_compact_json_length() {
        let record = into_record(json!({"a": 1, "b": "xy"})).unwrap();
        assert_eq!(record_size(&record), r#"{"a":1,"b":"xy"}"#.len());
    }

    #[test]
    fn test_sample_single_object() {
        let records = records_from_sample(r#"{"ip": "111.2.3.4"}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["ip"], "111.2.3.4");
    }

    #[test]
    fn test_sample_array_of_objects() {
        let records = records_from_sample(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_sample_rejects_scalars() {
        assert!(records_from_sample("42").is_err());
        assert!(records_from_sample("[1, 2]").is_err());
        assert!(records_from_sample("not json").is_err());
    }

    #[test]
    fn test_records_keep_insertion_order() {
        let mut record = Record::new();
        record.insert("zeta".into(), json!(1));
        record.insert("alpha".into(), json!(2));
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }
}
