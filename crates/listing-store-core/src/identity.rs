use crate::{codec, quote_identifier, validate_field_name, Identifier, RecordError, Value};

/// Conjunctive `WHERE` condition locating the row(s) that match an identifier.
///
/// `clause` uses numbered placeholders (`?1`, `?2`, ...) in identifier field order;
/// `params` holds the values to bind. Absent values become `IS NULL` terms and bind
/// nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    clause: String,
    params: Vec<Value>,
    terms: Vec<(String, Value)>,
}

impl Predicate {
    #[must_use]
    pub fn clause(&self) -> &str {
        &self.clause
    }

    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Columns referenced by the predicate, in clause order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(column, _)| column.as_str())
    }

    /// The same condition with every value inlined as a codec literal. Diagnostic only.
    ///
    /// # Errors
    /// Returns [`RecordError::Serialization`] when a value cannot be rendered.
    pub fn literal(&self) -> Result<String, RecordError> {
        let mut rendered = Vec::with_capacity(self.terms.len());
        for (column, value) in &self.terms {
            if value.is_absent() {
                rendered.push(format!("{column} IS NULL"));
            } else {
                rendered.push(format!("{column} = {}", codec::encode(value)?));
            }
        }
        Ok(rendered.join(" AND "))
    }
}

/// Build the uniqueness predicate for `identifier`.
///
/// # Errors
/// Returns [`RecordError::EmptyIdentifier`] for an identifier without fields and
/// [`RecordError::InvalidFieldName`] when a field cannot name a column.
pub fn unique_where(identifier: &Identifier) -> Result<Predicate, RecordError> {
    if identifier.is_empty() {
        return Err(RecordError::EmptyIdentifier);
    }

    let mut terms = Vec::with_capacity(identifier.len());
    let mut params = Vec::with_capacity(identifier.len());
    let mut clauses = Vec::with_capacity(identifier.len());

    for (column, value) in identifier.iter() {
        validate_field_name(column)?;
        if value.is_absent() {
            clauses.push(format!("{} IS NULL", quote_identifier(column)));
        } else {
            params.push(value.clone());
            clauses.push(format!("{} = ?{}", quote_identifier(column), params.len()));
        }
        terms.push((column.clone(), value.clone()));
    }

    Ok(Predicate { clause: clauses.join(" AND "), params, terms })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_field_predicate() -> Result<(), RecordError> {
        let predicate = unique_where(&Identifier::single("url", "http://a"))?;
        assert_eq!(predicate.clause(), "[url] = ?1");
        assert_eq!(predicate.params(), &[Value::from("http://a")]);
        assert_eq!(predicate.literal()?, "url = $TOKEN$http://a$TOKEN$");
        Ok(())
    }

    #[test]
    fn multi_field_predicate_is_a_conjunction_in_field_order() -> Result<(), RecordError> {
        let identifier = Identifier::new()
            .with("site", "wg-gesucht")
            .with("listing_number", 42)
            .with("district", Value::Absent);
        let predicate = unique_where(&identifier)?;
        assert_eq!(
            predicate.clause(),
            "[district] IS NULL AND [listing_number] = ?1 AND [site] = ?2"
        );
        assert_eq!(predicate.params(), &[Value::from(42), Value::from("wg-gesucht")]);
        assert_eq!(
            predicate.columns().collect::<Vec<_>>(),
            vec!["district", "listing_number", "site"]
        );
        assert_eq!(
            predicate.literal()?,
            "district IS NULL AND listing_number = 42 AND site = $TOKEN$wg-gesucht$TOKEN$"
        );
        Ok(())
    }

    #[test]
    fn empty_identifier_is_rejected() {
        assert_eq!(unique_where(&Identifier::new()), Err(RecordError::EmptyIdentifier));
    }

    #[test]
    fn malformed_identifier_fields_are_rejected() {
        let identifier = Identifier::single("url = 1 OR 1", "x");
        assert!(matches!(unique_where(&identifier), Err(RecordError::InvalidFieldName { .. })));
    }
}
