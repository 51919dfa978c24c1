use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use time::PrimitiveDateTime;

use crate::codec;
use crate::RecordError;

pub const MAX_IDENTIFIER_LEN: usize = 63;
pub const SURROGATE_ID_COLUMN: &str = "id";

/// One scraped value. The set of kinds is closed; nothing converts between them implicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(PrimitiveDateTime),
    List(Vec<Value>),
    Absent,
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::List(_) => ValueKind::List,
            Self::Absent => ValueKind::Absent,
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Column type a freshly created column gets when this value is the first one seen.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        ColumnType::for_kind(self.kind())
    }

    /// Whether this value may be written into a column of type `column`.
    ///
    /// `Absent` fits every column; `Text` and `List` share the text column type.
    #[must_use]
    pub fn fits(&self, column: ColumnType) -> bool {
        self.is_absent() || self.column_type() == column
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::Boolean(value) => serializer.serialize_bool(*value),
            Self::Timestamp(value) => {
                let text = codec::format_timestamp(*value).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&text)
            }
            Self::List(items) => items.serialize(serializer),
            Self::Absent => serializer.serialize_none(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    List,
    Absent,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::List => "list",
            Self::Absent => "absent",
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a lazily added column. Fixed once the column exists.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
}

impl ColumnType {
    #[must_use]
    pub fn for_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Integer => Self::Integer,
            ValueKind::Float => Self::Real,
            ValueKind::Boolean => Self::Boolean,
            ValueKind::Timestamp => Self::Timestamp,
            // No observed type for Absent; text is the widest choice.
            ValueKind::Text | ValueKind::List | ValueKind::Absent => Self::Text,
        }
    }

    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => Some(Self::Integer),
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" => Some(Self::Real),
            "TEXT" => Some(Self::Text),
            "BOOLEAN" | "BOOL" => Some(Self::Boolean),
            "TIMESTAMP" => Some(Self::Timestamp),
            _ => None,
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Field name to value mapping handed to the store by a scraper.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Check every field name can back a column.
    ///
    /// # Errors
    /// Returns [`RecordError::InvalidFieldName`] for malformed or reserved names, or for
    /// two names that only differ by case (`SQLite` column names are case-insensitive).
    pub fn validate(&self) -> Result<(), RecordError> {
        let mut folded = BTreeSet::new();
        for name in self.fields.keys() {
            validate_field_name(name)?;
            if !folded.insert(name.to_ascii_lowercase()) {
                return Err(RecordError::InvalidFieldName {
                    name: name.clone(),
                    reason: "collides with another field when case is ignored".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Restrict this record to the identifying `fields`.
    ///
    /// # Errors
    /// Returns [`RecordError::EmptyIdentifier`] when `fields` is empty and
    /// [`RecordError::MissingField`] when the record lacks one of them.
    pub fn identifier(&self, fields: &[&str]) -> Result<Identifier, RecordError> {
        if fields.is_empty() {
            return Err(RecordError::EmptyIdentifier);
        }
        let mut identifier = Identifier::new();
        for field in fields {
            let value = self
                .fields
                .get(*field)
                .ok_or_else(|| RecordError::MissingField((*field).to_string()))?;
            identifier.insert(*field, value.clone());
        }
        Ok(identifier)
    }

    /// Convert a decoded JSON object into a record.
    ///
    /// # Errors
    /// Returns [`RecordError::NotAnObject`] when `value` is not an object and
    /// [`RecordError::UnsupportedKind`] when a field holds a nested object or an
    /// unsigned integer that does not fit `i64`.
    pub fn from_json(value: &JsonValue) -> Result<Self, RecordError> {
        let JsonValue::Object(object) = value else {
            return Err(RecordError::NotAnObject { kind: json_kind(value).to_string() });
        };

        let mut record = Self::new();
        for (field, raw) in object {
            record.insert(field.clone(), value_from_json(field, raw)?);
        }
        Ok(record)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// The subset of a record's fields that a caller treats as its business key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Identifier(Record);

impl Identifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(Record::new().with(field, value))
    }

    #[must_use]
    pub fn with(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(self.0.with(field, value))
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field, value)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_record(&self) -> &Record {
        &self.0
    }
}

impl From<Record> for Identifier {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Bracket-quote a validated identifier.
///
/// Brackets never fall back to a string literal the way an unknown double-quoted
/// identifier does in `SQLite`, so a missing column is always reported as missing.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("[{name}]")
}

/// # Errors
/// Returns [`RecordError::InvalidFieldName`] when `name` cannot be used as a table name.
pub fn validate_table_name(name: &str) -> Result<(), RecordError> {
    check_identifier(name)?;
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(invalid(name, "names starting with sqlite_ are reserved"));
    }
    Ok(())
}

/// # Errors
/// Returns [`RecordError::InvalidFieldName`] when `name` cannot back a column.
pub fn validate_field_name(name: &str) -> Result<(), RecordError> {
    check_identifier(name)?;
    if name.eq_ignore_ascii_case(SURROGATE_ID_COLUMN) {
        return Err(invalid(name, "reserved for the surrogate key"));
    }
    Ok(())
}

fn check_identifier(name: &str) -> Result<(), RecordError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid(name, "must not be empty"));
    };
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(name, "longer than 63 characters"));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid(name, "must start with a letter or underscore"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(name, "only ASCII letters, digits and underscores are allowed"));
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> RecordError {
    RecordError::InvalidFieldName { name: name.to_string(), reason: reason.to_string() }
}

fn value_from_json(field: &str, value: &JsonValue) -> Result<Value, RecordError> {
    match value {
        JsonValue::Null => Ok(Value::Absent),
        JsonValue::Bool(flag) => Ok(Value::Boolean(*flag)),
        JsonValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(Value::Integer(integer))
            } else if number.is_u64() {
                Err(unsupported(field, "unsigned integer beyond i64"))
            } else {
                number.as_f64().map(Value::Float).ok_or_else(|| unsupported(field, "number"))
            }
        }
        JsonValue::String(text) => Ok(Value::Text(text.clone())),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| value_from_json(field, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        JsonValue::Object(_) => Err(unsupported(field, "object")),
    }
}

fn unsupported(field: &str, kind: &str) -> RecordError {
    RecordError::UnsupportedKind { field: field.to_string(), kind: kind.to_string() }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
