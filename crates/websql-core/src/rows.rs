//! Conversions between the JSON world of the wire protocol and SQLite's
//! value space, in both directions.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;
use websql_types::{Row, SqlError};

/// Bind values for one statement. `executeSql` arguments are scalars by
/// contract, so anything without a scalar SQLite representation fails the
/// statement the same way a malformed statement would.
pub(crate) fn args_to_sql(args: &[JsonValue]) -> Result<Vec<SqlValue>, SqlError> {
    let mut bound = Vec::with_capacity(args.len());
    for (position, value) in args.iter().enumerate() {
        let cell = bind_value(value).ok_or_else(|| {
            SqlError::syntax(format!(
                "cannot bind argument {} of type {}",
                position + 1,
                json_type_name(value)
            ))
        })?;
        bound.push(cell);
    }
    Ok(bound)
}

fn bind_value(value: &JsonValue) -> Option<SqlValue> {
    match value {
        JsonValue::Null => Some(SqlValue::Null),
        JsonValue::Bool(flag) => Some(SqlValue::Integer(i64::from(*flag))),
        JsonValue::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real)),
        JsonValue::String(text) => Some(SqlValue::Text(text.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// One cursor row as an ordered name-to-value record.
pub(crate) fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut record = Row::new();
    for (index, name) in columns.iter().enumerate() {
        record.insert(name.clone(), cell_to_json(row.get_ref(index)?));
    }
    Ok(record)
}

fn cell_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(int) => JsonValue::Number(int.into()),
        ValueRef::Real(real) => serde_json::Number::from_f64(real)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(BASE64_STANDARD.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_args_convert() {
        let converted =
            args_to_sql(&[json!(null), json!(true), json!(7), json!(1.5), json!("hi")]).unwrap();
        assert_eq!(
            converted,
            vec![
                SqlValue::Null,
                SqlValue::Integer(1),
                SqlValue::Integer(7),
                SqlValue::Real(1.5),
                SqlValue::Text("hi".to_string()),
            ]
        );
    }

    #[test]
    fn compound_args_are_rejected() {
        let error = args_to_sql(&[json!(1), json!({"a": 1})]).unwrap_err();
        assert_eq!(error.code, SqlError::SYNTAX);
        assert!(error.message.contains("argument 2"));
        assert!(error.message.contains("object"));
    }

    #[test]
    fn array_args_are_rejected() {
        let error = args_to_sql(&[json!([1, 2])]).unwrap_err();
        assert_eq!(error.code, SqlError::SYNTAX);
        assert!(error.message.contains("argument 1"));
        assert!(error.message.contains("array"));
    }

    #[test]
    fn cells_round_trip_through_json() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("SELECT 3 AS i, 2.5 AS r, 'text' AS t, x'01ff' AS b, NULL AS n")
            .unwrap();
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        let record = read_row(row, &columns).unwrap();
        assert_eq!(record["i"], json!(3));
        assert_eq!(record["r"], json!(2.5));
        assert_eq!(record["t"], json!("text"));
        assert_eq!(record["b"], json!("Af8="));
        assert_eq!(record["n"], JsonValue::Null);
    }

    #[test]
    fn record_keeps_declared_column_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1 AS zeta, 2 AS alpha, 3 AS mid").unwrap();
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        let record = read_row(row, &columns).unwrap();
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }
}
