use listing_store_core::codec::{self, NAN_SENTINEL};
use listing_store_core::{ColumnType, RecordError, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Parameter form of `value`.
///
/// NaN is stored as the text sentinel because `SQLite` turns a bound NaN into NULL.
pub(crate) fn to_sql(value: &Value) -> Result<SqlValue, RecordError> {
    let bound = match value {
        Value::Integer(integer) => SqlValue::Integer(*integer),
        Value::Float(float) if float.is_nan() => SqlValue::Text(NAN_SENTINEL.to_string()),
        Value::Float(float) => SqlValue::Real(*float),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Boolean(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Timestamp(timestamp) => SqlValue::Text(codec::format_timestamp(*timestamp)?),
        Value::List(items) => SqlValue::Text(codec::list_json(items)?),
        Value::Absent => SqlValue::Null,
    };
    Ok(bound)
}

pub(crate) fn to_sql_all(values: &[Value]) -> Result<Vec<SqlValue>, RecordError> {
    values.iter().map(to_sql).collect()
}

/// Best-effort decode of a stored cell, guided by the column's declared type.
/// Lists come back as their JSON text.
pub(crate) fn from_sql(value: ValueRef<'_>, column: Option<ColumnType>) -> Value {
    match (value, column) {
        (ValueRef::Null, _) => Value::Absent,
        (ValueRef::Integer(integer), Some(ColumnType::Boolean)) => Value::Boolean(integer != 0),
        (ValueRef::Integer(integer), _) => Value::Integer(integer),
        (ValueRef::Real(float), _) => Value::Float(float),
        (ValueRef::Text(bytes), Some(ColumnType::Real)) if bytes == NAN_SENTINEL.as_bytes() => {
            Value::Float(f64::NAN)
        }
        (ValueRef::Text(bytes), Some(ColumnType::Timestamp)) => {
            let text = String::from_utf8_lossy(bytes);
            codec::parse_timestamp(&text)
                .map_or_else(|_| Value::Text(text.into_owned()), Value::Timestamp)
        }
        (ValueRef::Text(bytes) | ValueRef::Blob(bytes), _) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn binds_every_kind() -> Result<(), RecordError> {
        assert_eq!(to_sql(&Value::from(500))?, SqlValue::Integer(500));
        assert_eq!(to_sql(&Value::from(2.5))?, SqlValue::Real(2.5));
        assert_eq!(to_sql(&Value::Float(f64::NAN))?, SqlValue::Text("nan".into()));
        assert_eq!(to_sql(&Value::from("a'b"))?, SqlValue::Text("a'b".into()));
        assert_eq!(to_sql(&Value::from(true))?, SqlValue::Integer(1));
        assert_eq!(
            to_sql(&Value::from(datetime!(2024-03-01 12:30:00)))?,
            SqlValue::Text("2024-03-01 12:30:00".into())
        );
        assert_eq!(to_sql(&Value::from(vec!["x", "y"]))?, SqlValue::Text(r#"["x", "y"]"#.into()));
        assert_eq!(to_sql(&Value::Absent)?, SqlValue::Null);
        Ok(())
    }

    #[test]
    fn decodes_by_declared_type() {
        assert_eq!(from_sql(ValueRef::Integer(1), Some(ColumnType::Boolean)), Value::Boolean(true));
        assert_eq!(from_sql(ValueRef::Integer(7), Some(ColumnType::Integer)), Value::Integer(7));
        assert_eq!(
            from_sql(ValueRef::Text(b"2024-03-01 12:30:00"), Some(ColumnType::Timestamp)),
            Value::Timestamp(datetime!(2024-03-01 12:30:00))
        );
        assert_eq!(
            from_sql(ValueRef::Text(b"yesterday"), Some(ColumnType::Timestamp)),
            Value::Text("yesterday".into())
        );
        assert!(matches!(
            from_sql(ValueRef::Text(b"nan"), Some(ColumnType::Real)),
            Value::Float(float) if float.is_nan()
        ));
        assert_eq!(from_sql(ValueRef::Null, None), Value::Absent);
    }
}
