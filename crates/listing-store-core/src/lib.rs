pub mod codec;
pub mod extract;
pub mod identity;
mod value;

pub use extract::{ExtractFn, ExtractorRegistry};
pub use identity::{unique_where, Predicate};
pub use value::{
    quote_identifier, validate_field_name, validate_table_name, ColumnType, Identifier, Record,
    Value, ValueKind, MAX_IDENTIFIER_LEN, SURROGATE_ID_COLUMN,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RecordError {
    #[error("field `{field}` has unsupported kind: {kind}")]
    UnsupportedKind { field: String, kind: String },
    #[error("record input must be a JSON object, got {kind}")]
    NotAnObject { kind: String },
    #[error("invalid field name `{name}`: {reason}")]
    InvalidFieldName { name: String, reason: String },
    #[error("identifier must contain at least one field")]
    EmptyIdentifier,
    #[error("record has no value for identifying field `{0}`")]
    MissingField(String),
    #[error("extractor already registered for field `{0}`")]
    DuplicateExtractor(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
