use std::fmt::{Debug, Formatter};

use crate::{validate_field_name, Record, RecordError, Value};

pub type ExtractFn<S> = fn(&S) -> Option<Value>;

/// Statically declared field extractors for one source type.
///
/// Extractors run in registration order; an extractor returning `None` leaves its
/// field out of the record instead of writing an absent value.
pub struct ExtractorRegistry<S> {
    extractors: Vec<(String, ExtractFn<S>)>,
}

impl<S> ExtractorRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self { extractors: Vec::new() }
    }

    /// Register `extractor` as the producer of `field`.
    ///
    /// # Errors
    /// Returns [`RecordError::InvalidFieldName`] for a name that cannot back a column and
    /// [`RecordError::DuplicateExtractor`] when `field` already has an extractor.
    pub fn field(mut self, field: &str, extractor: ExtractFn<S>) -> Result<Self, RecordError> {
        validate_field_name(field)?;
        if self.extractors.iter().any(|(name, _)| name.eq_ignore_ascii_case(field)) {
            return Err(RecordError::DuplicateExtractor(field.to_string()));
        }
        self.extractors.push((field.to_string(), extractor));
        Ok(self)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.extractors.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    #[must_use]
    pub fn extract(&self, source: &S) -> Record {
        let mut record = Record::new();
        self.extract_into(source, &mut record);
        record
    }

    /// Run every extractor against `source`, overwriting fields already in `record`.
    pub fn extract_into(&self, source: &S, record: &mut Record) {
        for (field, extractor) in &self.extractors {
            if let Some(value) = extractor(source) {
                record.insert(field.clone(), value);
            }
        }
    }
}

impl<S> Default for ExtractorRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Debug for ExtractorRegistry<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Listing {
        url: &'static str,
        price: &'static str,
        rooms: Option<u8>,
    }

    fn url(listing: &Listing) -> Option<Value> {
        Some(Value::from(listing.url))
    }

    fn rent(listing: &Listing) -> Option<Value> {
        listing.price.trim_end_matches(" EUR").parse::<i64>().ok().map(Value::Integer)
    }

    fn rooms(listing: &Listing) -> Option<Value> {
        listing.rooms.map(|count| Value::Integer(i64::from(count)))
    }

    fn registry() -> Result<ExtractorRegistry<Listing>, RecordError> {
        ExtractorRegistry::new().field("url", url)?.field("rent", rent)?.field("rooms", rooms)
    }

    #[test]
    fn extract_builds_record_from_declared_fields() -> Result<(), RecordError> {
        let registry = registry()?;
        assert_eq!(registry.field_names().collect::<Vec<_>>(), vec!["url", "rent", "rooms"]);

        let record =
            registry.extract(&Listing { url: "http://a", price: "500 EUR", rooms: Some(2) });
        assert_eq!(
            record,
            Record::new().with("url", "http://a").with("rent", 500).with("rooms", 2)
        );
        Ok(())
    }

    #[test]
    fn failed_extractors_leave_fields_out() -> Result<(), RecordError> {
        let record =
            registry()?.extract(&Listing { url: "http://b", price: "on request", rooms: None });
        assert_eq!(record, Record::new().with("url", "http://b"));
        Ok(())
    }

    #[test]
    fn duplicate_and_invalid_fields_are_rejected() -> Result<(), RecordError> {
        let duplicate = registry()?.field("URL", url);
        assert_eq!(duplicate.map(|r| r.len()), Err(RecordError::DuplicateExtractor("URL".into())));

        let invalid = ExtractorRegistry::<Listing>::new().field("id", url);
        assert!(matches!(invalid, Err(RecordError::InvalidFieldName { .. })));
        Ok(())
    }
}
