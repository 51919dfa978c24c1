//! Literal rendering of values.
//!
//! Statements issued by the store bind every value as a parameter; the literal
//! form produced here is what shows up in logs, `--explain` output and other
//! diagnostics. It keeps the scraper-era conventions: text is wrapped in a
//! `$TOKEN$` delimiter, NaN is the bare word `nan`, lists are JSON with spaced separators.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::{RecordError, Value};

pub const STR_TOKEN: &str = "$TOKEN$";
pub const NAN_SENTINEL: &str = "nan";
pub const NULL_KEYWORD: &str = "NULL";
pub const TRUE_LITERAL: &str = "TRUE";
pub const FALSE_LITERAL: &str = "FALSE";

pub const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Render `value` as a statement literal.
///
/// # Errors
/// Returns [`RecordError::Serialization`] when a timestamp cannot be formatted or a
/// list cannot be serialized.
pub fn encode(value: &Value) -> Result<String, RecordError> {
    let literal = match value {
        Value::Text(text) => wrap(text),
        Value::Boolean(true) => TRUE_LITERAL.to_string(),
        Value::Boolean(false) => FALSE_LITERAL.to_string(),
        Value::Integer(integer) => integer.to_string(),
        Value::Float(float) => encode_float(*float),
        Value::Timestamp(timestamp) => wrap(&format_timestamp(*timestamp)?),
        Value::List(items) => wrap(&list_json(items)?),
        Value::Absent => NULL_KEYWORD.to_string(),
    };
    Ok(literal)
}

/// # Errors
/// Returns [`RecordError::Serialization`] when the timestamp cannot be rendered.
pub fn format_timestamp(timestamp: PrimitiveDateTime) -> Result<String, RecordError> {
    timestamp
        .format(TIMESTAMP_FORMAT)
        .map_err(|err| RecordError::Serialization(format!("invalid timestamp: {err}")))
}

/// # Errors
/// Returns [`RecordError::Serialization`] when `text` is not `YYYY-MM-DD HH:MM:SS`.
pub fn parse_timestamp(text: &str) -> Result<PrimitiveDateTime, RecordError> {
    PrimitiveDateTime::parse(text, TIMESTAMP_FORMAT)
        .map_err(|err| RecordError::Serialization(format!("invalid timestamp {text}: {err}")))
}

/// JSON array text with `", "` between elements (`["x", "y"]`), the form stored in
/// existing listing tables. Non-finite floats become `null`.
///
/// # Errors
/// Returns [`RecordError::Serialization`] when an element cannot be serialized.
pub fn list_json(items: &[Value]) -> Result<String, RecordError> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    items
        .serialize(&mut serializer)
        .map_err(|err| RecordError::Serialization(err.to_string()))?;
    String::from_utf8(out).map_err(|err| RecordError::Serialization(err.to_string()))
}

fn wrap(text: &str) -> String {
    format!("{STR_TOKEN}{text}{STR_TOKEN}")
}

fn encode_float(float: f64) -> String {
    if float.is_nan() {
        NAN_SENTINEL.to_string()
    } else if float.is_infinite() {
        let sentinel = if float.is_sign_positive() { "inf" } else { "-inf" };
        sentinel.to_string()
    } else {
        format!("{float:?}")
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn encodes_each_kind() -> Result<(), RecordError> {
        assert_eq!(encode(&Value::from("http://a"))?, "$TOKEN$http://a$TOKEN$");
        assert_eq!(encode(&Value::from(true))?, "TRUE");
        assert_eq!(encode(&Value::from(false))?, "FALSE");
        assert_eq!(encode(&Value::from(500))?, "500");
        assert_eq!(encode(&Value::from(-7))?, "-7");
        assert_eq!(encode(&Value::from(3.5213))?, "3.5213");
        assert_eq!(encode(&Value::from(3.0))?, "3.0");
        assert_eq!(
            encode(&Value::from(datetime!(2024-03-01 09:05:07)))?,
            "$TOKEN$2024-03-01 09:05:07$TOKEN$"
        );
        assert_eq!(encode(&Value::from(vec!["x", "y"]))?, r#"$TOKEN$["x", "y"]$TOKEN$"#);
        assert_eq!(encode(&Value::Absent)?, "NULL");
        Ok(())
    }

    #[test]
    fn nan_is_a_bare_sentinel() -> Result<(), RecordError> {
        let literal = encode(&Value::Float(f64::NAN))?;
        assert_eq!(literal, "nan");
        assert!(!literal.contains(STR_TOKEN));
        assert_eq!(encode(&Value::Float(f64::INFINITY))?, "inf");
        assert_eq!(encode(&Value::Float(f64::NEG_INFINITY))?, "-inf");
        Ok(())
    }

    #[test]
    fn text_is_not_escaped() -> Result<(), RecordError> {
        let raw = r#"THIS"is|" some'TEXT"BRO"#;
        assert_eq!(encode(&Value::from(raw))?, format!("$TOKEN${raw}$TOKEN$"));
        Ok(())
    }

    #[test]
    fn list_json_uses_spaced_separators() -> Result<(), RecordError> {
        let nested = Value::List(vec![
            Value::from(1),
            Value::from(f64::NAN),
            Value::from(vec![true, false]),
            Value::Absent,
            Value::from(datetime!(2024-03-01 00:00:00)),
        ]);
        let Value::List(items) = &nested else {
            panic!("fixture must be a list");
        };
        assert_eq!(list_json(items)?, r#"[1, null, [true, false], null, "2024-03-01 00:00:00"]"#);
        assert_eq!(list_json(&[])?, "[]");
        Ok(())
    }

    #[test]
    fn timestamps_round_trip_through_text() -> Result<(), RecordError> {
        let timestamp = datetime!(1999-12-31 23:59:59);
        assert_eq!(parse_timestamp(&format_timestamp(timestamp)?)?, timestamp);
        assert!(parse_timestamp("31.12.1999").is_err());
        Ok(())
    }

    proptest! {
        #[test]
        fn property_integers_encode_as_plain_decimal(value in any::<i64>()) {
            let literal = encode(&Value::Integer(value));
            prop_assert_eq!(literal, Ok(value.to_string()));
        }

        #[test]
        fn property_text_is_always_token_wrapped(text in ".*") {
            let literal = encode(&Value::Text(text.clone()));
            prop_assert_eq!(literal, Ok(format!("{STR_TOKEN}{text}{STR_TOKEN}")));
        }

        #[test]
        fn property_finite_floats_parse_back(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
            let literal = encode(&Value::Float(value)).map_err(|err| TestCaseError::fail(err.to_string()))?;
            let parsed: f64 = literal.parse().map_err(|err| TestCaseError::fail(format!("{err}")))?;
            prop_assert_eq!(parsed, value);
        }
    }
}
