//! Conversion between stored rows and [`ExecutionEvent`]s.
//!
//! Columns are looked up by name, so the decoder works for any projection
//! that includes the required columns, and for the baseline schema that has
//! no `prev_hash`/`event_hash` columns at all.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use toolaudit_types::{QueryResult, SqlValue};

use crate::error::DecodeError;
use crate::event::{ExecutionEvent, NewEvent};

/// Column names of the `execution_events` table.
pub(crate) mod col {
    pub const ID: &str = "id";
    pub const REQUEST_ID: &str = "request_id";
    pub const TYPE: &str = "type";
    pub const PAYLOAD: &str = "payload";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const PREV_HASH: &str = "prev_hash";
    pub const EVENT_HASH: &str = "event_hash";
}

/// Decodes one row given the column names of its result set.
///
/// # Errors
///
/// Returns [`DecodeError`] if a required column is missing or a value
/// cannot be normalized.
pub fn decode(columns: &[String], row: &[SqlValue]) -> Result<ExecutionEvent, DecodeError> {
    let get = |name: &'static str| -> Option<&SqlValue> {
        columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| row.get(idx))
    };
    let required = |name: &'static str| get(name).ok_or(DecodeError::MissingColumn(name));

    let sequence_id = match required(col::ID)? {
        SqlValue::Integer(id) => *id,
        other => return Err(invalid(col::ID, other)),
    };

    Ok(ExecutionEvent {
        sequence_id,
        request_id: text(col::REQUEST_ID, required(col::REQUEST_ID)?)?,
        event_type: text(col::TYPE, required(col::TYPE)?)?,
        payload: payload(required(col::PAYLOAD)?)?,
        correlation_id: optional_text(col::CORRELATION_ID, get(col::CORRELATION_ID))?,
        timestamp: timestamp_ms(required(col::TIMESTAMP)?)?,
        prev_hash: optional_text(col::PREV_HASH, get(col::PREV_HASH))?,
        event_hash: optional_text(col::EVENT_HASH, get(col::EVENT_HASH))?,
    })
}

/// Decodes every row of a result set, keeping per-row failures separate so
/// callers can decide whether one bad row poisons the whole read.
pub fn decode_all(result: &QueryResult) -> Vec<Result<ExecutionEvent, DecodeError>> {
    result
        .rows
        .iter()
        .map(|row| decode(&result.columns, row))
        .collect()
}

/// Encodes an event for the chained insert:
/// `(request_id, type, payload, correlation_id, timestamp, prev_hash, event_hash)`.
pub fn encode(
    event: &NewEvent,
    prev_hash: Option<&str>,
    event_hash: Option<&str>,
) -> Vec<SqlValue> {
    let mut params = encode_baseline(event);
    params.push(prev_hash.map(str::to_string).into());
    params.push(event_hash.map(str::to_string).into());
    params
}

/// Encodes an event for the baseline insert:
/// `(request_id, type, payload, correlation_id, timestamp)`.
pub fn encode_baseline(event: &NewEvent) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(event.request_id.clone()),
        SqlValue::Text(event.event_type.clone()),
        SqlValue::Json(event.payload.clone()),
        event.correlation_id.clone().into(),
        SqlValue::Integer(event.timestamp),
    ]
}

/// Checks that `payload` survives the text round trip [`decode`] performs.
///
/// `serde_json` writes any nesting depth but stops parsing at a fixed
/// recursion limit, so a payload can be stored that no reader could load.
///
/// # Errors
///
/// Returns the parser's error for a payload that would not decode.
pub fn ensure_decodable(payload: &Value) -> Result<(), serde_json::Error> {
    parse_payload(&serde_json::to_string(payload)?).map(drop)
}

fn parse_payload(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

fn text(column: &'static str, value: &SqlValue) -> Result<String, DecodeError> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        other => Err(invalid(column, other)),
    }
}

fn optional_text(
    column: &'static str,
    value: Option<&SqlValue>,
) -> Result<Option<String>, DecodeError> {
    match value {
        None | Some(SqlValue::Null) => Ok(None),
        Some(v) => text(column, v).map(Some),
    }
}

fn payload(value: &SqlValue) -> Result<Value, DecodeError> {
    match value {
        SqlValue::Json(v) => Ok(v.clone()),
        SqlValue::Text(s) => {
            parse_payload(s).map_err(|e| DecodeError::InvalidPayload(e.to_string()))
        }
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(n) => Ok(Value::from(*n)),
        SqlValue::Real(n) => Ok(Value::from(*n)),
        other @ SqlValue::Timestamp(_) => Err(invalid(col::PAYLOAD, other)),
    }
}

fn timestamp_ms(value: &SqlValue) -> Result<i64, DecodeError> {
    match value {
        SqlValue::Integer(ms) => Ok(*ms),
        SqlValue::Timestamp(dt) => Ok(dt.timestamp_millis()),
        SqlValue::Real(ms) if ms.is_finite() => Ok(*ms as i64),
        SqlValue::Text(s) => parse_timestamp_text(s),
        other => Err(invalid(col::TIMESTAMP, other)),
    }
}

/// Accepts RFC 3339 / ISO 8601 (`2024-05-01T12:00:00.123Z`), SQLite's
/// `datetime()` format (`2024-05-01 12:00:00`, assumed UTC), and
/// stringified epoch milliseconds.
fn parse_timestamp_text(s: &str) -> Result<i64, DecodeError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    s.parse::<i64>()
        .map_err(|_| DecodeError::InvalidTimestamp(s.to_string()))
}

fn invalid(column: &'static str, found: &SqlValue) -> DecodeError {
    let found = match found {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(n) => format!("integer {n}"),
        SqlValue::Real(n) => format!("real {n}"),
        SqlValue::Text(_) => "text".to_string(),
        SqlValue::Json(_) => "json".to_string(),
        SqlValue::Timestamp(_) => "timestamp".to_string(),
    };
    DecodeError::InvalidType { column, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn baseline_columns() -> Vec<String> {
        columns(&["id", "request_id", "type", "payload", "correlation_id", "timestamp"])
    }

    fn baseline_row(payload: SqlValue, timestamp: SqlValue) -> Vec<SqlValue> {
        vec![
            SqlValue::Integer(7),
            SqlValue::Text("req-1".to_string()),
            SqlValue::Text("tool:proposed".to_string()),
            payload,
            SqlValue::Null,
            timestamp,
        ]
    }

    #[test]
    fn decodes_payload_from_json_text_and_structured_value() {
        let expected = json!({"tool": "READ_FILE", "args": {"path": "/tmp/a"}});

        let from_text = decode(
            &baseline_columns(),
            &baseline_row(
                SqlValue::Text(expected.to_string()),
                SqlValue::Integer(1_000),
            ),
        )
        .expect("text payload should decode");
        let from_json = decode(
            &baseline_columns(),
            &baseline_row(SqlValue::Json(expected.clone()), SqlValue::Integer(1_000)),
        )
        .expect("structured payload should decode");

        assert_eq!(from_text.payload, expected);
        assert_eq!(from_json.payload, expected);
    }

    #[test]
    fn normalizes_timestamp_representations() {
        let expected = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid date")
            .timestamp_millis()
            + 250;

        let cases = [
            SqlValue::Integer(expected),
            SqlValue::Text("2024-05-01T12:00:00.250Z".to_string()),
            SqlValue::Text("2024-05-01T14:00:00.250+02:00".to_string()),
            SqlValue::Text("2024-05-01 12:00:00.250".to_string()),
            SqlValue::Text(expected.to_string()),
            SqlValue::Timestamp(
                Utc.timestamp_millis_opt(expected)
                    .single()
                    .expect("valid millis"),
            ),
        ];

        for ts in cases {
            let event = decode(&baseline_columns(), &baseline_row(SqlValue::Json(json!({})), ts.clone()))
                .unwrap_or_else(|e| panic!("{ts:?} should decode: {e}"));
            assert_eq!(event.timestamp, expected, "case {ts:?}");
        }
    }

    #[test]
    fn null_correlation_is_absent_not_the_string_null() {
        let event = decode(
            &baseline_columns(),
            &baseline_row(SqlValue::Json(json!({})), SqlValue::Integer(1)),
        )
        .expect("row should decode");
        assert_eq!(event.correlation_id, None);
    }

    #[test]
    fn baseline_schema_decodes_without_chain_fields() {
        let event = decode(
            &baseline_columns(),
            &baseline_row(SqlValue::Json(json!({"a": 1})), SqlValue::Integer(1)),
        )
        .expect("baseline row should decode");
        assert_eq!(event.sequence_id, 7);
        assert_eq!(event.prev_hash, None);
        assert_eq!(event.event_hash, None);
    }

    #[test]
    fn chain_columns_are_mapped_when_present() {
        let mut cols = baseline_columns();
        cols.extend(columns(&["prev_hash", "event_hash"]));
        let mut row = baseline_row(SqlValue::Json(json!(null)), SqlValue::Integer(1));
        row.push(SqlValue::Null);
        row.push(SqlValue::Text("beef".to_string()));

        let event = decode(&cols, &row).expect("chained row should decode");
        assert_eq!(event.prev_hash, None);
        assert_eq!(event.event_hash.as_deref(), Some("beef"));
    }

    #[test]
    fn rejects_malformed_payload_and_timestamp() {
        let bad_payload = decode(
            &baseline_columns(),
            &baseline_row(SqlValue::Text("{not json".to_string()), SqlValue::Integer(1)),
        );
        assert!(matches!(bad_payload, Err(DecodeError::InvalidPayload(_))));

        let bad_ts = decode(
            &baseline_columns(),
            &baseline_row(SqlValue::Json(json!({})), SqlValue::Text("yesterday".to_string())),
        );
        assert_eq!(
            bad_ts,
            Err(DecodeError::InvalidTimestamp("yesterday".to_string()))
        );
    }

    #[test]
    fn missing_required_column_is_reported() {
        let cols = columns(&["id", "request_id", "type", "timestamp"]);
        let row = vec![
            SqlValue::Integer(1),
            SqlValue::Text("req".to_string()),
            SqlValue::Text("t".to_string()),
            SqlValue::Integer(1),
        ];
        assert_eq!(decode(&cols, &row), Err(DecodeError::MissingColumn("payload")));
    }

    fn nested(depth: usize) -> Value {
        (0..depth).fold(json!("leaf"), |inner, _| json!([inner]))
    }

    #[test]
    fn decodability_follows_the_parser_depth_limit() {
        let shallow = nested(64);
        ensure_decodable(&shallow).expect("moderate nesting should pass");
        let text = serde_json::to_string(&shallow).expect("serialise");
        assert_eq!(
            payload(&SqlValue::Text(text)).expect("should decode"),
            shallow
        );

        let deep = nested(200);
        assert!(ensure_decodable(&deep).is_err());
        let text = serde_json::to_string(&deep).expect("writing has no depth limit");
        assert!(matches!(
            payload(&SqlValue::Text(text)),
            Err(DecodeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn encode_orders_parameters_for_the_insert() {
        let event = NewEvent {
            request_id: "req-'1'".to_string(),
            event_type: "tool:executed".to_string(),
            payload: json!({"ok": true}),
            correlation_id: None,
            timestamp: 42,
        };

        assert_eq!(
            encode(&event, Some("aa"), Some("bb")),
            vec![
                SqlValue::Text("req-'1'".to_string()),
                SqlValue::Text("tool:executed".to_string()),
                SqlValue::Json(json!({"ok": true})),
                SqlValue::Null,
                SqlValue::Integer(42),
                SqlValue::Text("aa".to_string()),
                SqlValue::Text("bb".to_string()),
            ]
        );
        assert_eq!(encode_baseline(&event).len(), 5);
    }
}
