use crate::collection::Document;
use crate::common::util::document_utils::{
    get_subdocument_value_collection_aware, has_subdocument_value,
};
use crate::common::{null_aware_equals, Value};
use crate::errors::DolomiteResult;
use crate::filter::filter::{apply_to_field_value, FilterProvider, MatchContext};
use crate::filter::pattern_filters::RegexFilter;
use std::fmt::{Display, Formatter};

/// A filter that matches all documents.
pub(crate) struct AllFilter;

impl FilterProvider for AllFilter {
    fn apply(&self, _entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        Ok(true)
    }
}

impl Display for AllFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AllFilter")
    }
}

/// Matches documents where a field equals a value, honoring the null/missing
/// equality class and the implicit array-element semantics.
pub(crate) struct EqualsFilter {
    field: String,
    value: Value,
}

impl EqualsFilter {
    pub(crate) fn new(field: String, value: Value) -> Self {
        EqualsFilter { field, value }
    }
}

impl FilterProvider for EqualsFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| {
            Ok(null_aware_equals(value, &self.value))
        })
    }
}

impl Display for EqualsFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} == {})", self.field, self.value)
    }
}

/// Matches documents where a field does not equal a value. The negation of
/// the full equality semantics, including the array-element fan-out.
pub(crate) struct NotEqualsFilter {
    field: String,
    value: Value,
}

impl NotEqualsFilter {
    pub(crate) fn new(field: String, value: Value) -> Self {
        NotEqualsFilter { field, value }
    }
}

impl FilterProvider for NotEqualsFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let mut scratch = MatchContext::new();
        let equal = apply_to_field_value(entry, &self.field, &mut scratch, |value| {
            Ok(null_aware_equals(value, &self.value))
        })?;
        Ok(!equal)
    }
}

impl Display for NotEqualsFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} != {})", self.field, self.value)
    }
}

/// Matches documents where a field equals any of the listed values; regex
/// members match against string values.
pub(crate) struct InFilter {
    field: String,
    values: Vec<Value>,
    patterns: Vec<RegexFilter>,
}

impl InFilter {
    pub(crate) fn new(field: String, values: Vec<Value>, patterns: Vec<RegexFilter>) -> Self {
        InFilter {
            field,
            values,
            patterns,
        }
    }

    pub(crate) fn matches_value(&self, value: &Value) -> bool {
        self.values
            .iter()
            .any(|candidate| null_aware_equals(value, candidate))
            || self.patterns.iter().any(|pattern| pattern.matches_value(value))
    }
}

impl FilterProvider for InFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| Ok(self.matches_value(value)))
    }
}

impl Display for InFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} in {} values)", self.field, self.values.len())
    }
}

/// Matches documents where a field equals none of the listed values. Matches
/// documents that lack the field entirely.
pub(crate) struct NotInFilter {
    inner: InFilter,
}

impl NotInFilter {
    pub(crate) fn new(field: String, values: Vec<Value>, patterns: Vec<RegexFilter>) -> Self {
        NotInFilter {
            inner: InFilter::new(field, values, patterns),
        }
    }
}

impl FilterProvider for NotInFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let mut scratch = MatchContext::new();
        let contained = self.inner.apply(entry, &mut scratch)?;
        Ok(!contained)
    }
}

impl Display for NotInFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(not {})", self.inner)
    }
}

/// Matches documents by field presence.
pub(crate) struct ExistsFilter {
    field: String,
    expected: bool,
}

impl ExistsFilter {
    pub(crate) fn new(field: String, expected: bool) -> Self {
        ExistsFilter { field, expected }
    }
}

impl FilterProvider for ExistsFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let value = get_subdocument_value_collection_aware(entry, &self.field)?;
        let exists = match &value {
            Value::Missing => false,
            // an empty fan-out result means no element carried the field
            Value::Array(items) if items.is_empty() => {
                has_subdocument_value(entry, &self.field)?
            }
            _ => true,
        };
        Ok(exists == self.expected)
    }
}

impl Display for ExistsFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} exists == {})", self.field, self.expected)
    }
}

/// One `$type` operand: a concrete type code or the `"number"` alias.
#[derive(Clone, Copy, Debug)]
pub(crate) enum TypeMatcher {
    Code(i32),
    Number,
}

impl TypeMatcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            TypeMatcher::Number => value.is_number(),
            TypeMatcher::Code(code) => value.type_number() == Some(*code),
        }
    }
}

/// Matches documents by the BSON type of a field.
pub(crate) struct TypeFilter {
    field: String,
    matchers: Vec<TypeMatcher>,
}

impl TypeFilter {
    pub(crate) fn new(field: String, matchers: Vec<TypeMatcher>) -> Self {
        TypeFilter { field, matchers }
    }
}

impl FilterProvider for TypeFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| {
            if value.is_missing() {
                return Ok(false);
            }
            Ok(self.matchers.iter().any(|matcher| matcher.matches(value)))
        })
    }
}

impl Display for TypeFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} type matches)", self.field)
    }
}

/// Matches documents where an array field has an exact length.
pub(crate) struct SizeFilter {
    field: String,
    size: i64,
}

impl SizeFilter {
    pub(crate) fn new(field: String, size: i64) -> Self {
        SizeFilter { field, size }
    }
}

impl FilterProvider for SizeFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| match value {
            Value::Array(items) => Ok(items.len() as i64 == self.size),
            _ => Ok(false),
        })
    }
}

impl Display for SizeFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} size == {})", self.field, self.size)
    }
}

/// Matches numeric fields by the remainder of a division.
pub(crate) struct ModFilter {
    field: String,
    divisor: i64,
    remainder: i64,
}

impl ModFilter {
    pub(crate) fn new(field: String, divisor: i64, remainder: i64) -> Self {
        ModFilter {
            field,
            divisor,
            remainder,
        }
    }
}

impl FilterProvider for ModFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        apply_to_field_value(entry, &self.field, ctx, |value| {
            match value.as_f64() {
                Some(double) if double.is_finite() => {
                    Ok((double as i64) % self.divisor == self.remainder)
                }
                _ => Ok(false),
            }
        })
    }
}

impl Display for ModFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} % {} == {})", self.field, self.divisor, self.remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_equals_matches_scalar_and_element() {
        let filter = EqualsFilter::new("a".to_string(), Value::Int32(5));
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 6 }, &mut ctx).unwrap());

        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: [1, 5, 9] }, &mut ctx).unwrap());
        assert_eq!(ctx.position(), Some(1));
    }

    #[test]
    fn test_equals_whole_array_literal() {
        let filter = EqualsFilter::new(
            "a".to_string(),
            Value::Array(vec![Value::Int32(1), Value::Int32(2)]),
        );
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: [1, 2] }, &mut ctx).unwrap());
        // the array literal also matches as an element of a nested array
        let mut ctx = MatchContext::new();
        assert!(filter
            .apply(&doc! { a: [[1, 2], [3]] }, &mut ctx)
            .unwrap());
        assert_eq!(ctx.position(), Some(0));
    }

    #[test]
    fn test_equals_null_matches_missing() {
        let filter = EqualsFilter::new("a".to_string(), Value::Null);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { b: 1 }, &mut ctx).unwrap());
        assert!(filter.apply(&doc! { a: (Value::Null) }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 0 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_not_equals() {
        let filter = NotEqualsFilter::new("a".to_string(), Value::Int32(5));
        let mut ctx = MatchContext::new();
        assert!(!filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: [1, 5] }, &mut ctx).unwrap());
        assert!(filter.apply(&doc! { a: [1, 2] }, &mut ctx).unwrap());
        assert!(filter.apply(&doc! { b: 1 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_in_filter() {
        let filter = InFilter::new(
            "a".to_string(),
            vec![Value::Int32(1), Value::Int32(3)],
            vec![],
        );
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: 3 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 2 }, &mut ctx).unwrap());
        assert!(filter.apply(&doc! { a: [7, 3] }, &mut ctx).unwrap());
    }

    #[test]
    fn test_nin_matches_missing_field() {
        let filter = NotInFilter::new("a".to_string(), vec![Value::Int32(1)], vec![]);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { b: 2 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 1 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_exists_filter() {
        let yes = ExistsFilter::new("a".to_string(), true);
        let no = ExistsFilter::new("a".to_string(), false);
        let mut ctx = MatchContext::new();
        assert!(yes.apply(&doc! { a: (Value::Null) }, &mut ctx).unwrap());
        assert!(!yes.apply(&doc! { b: 1 }, &mut ctx).unwrap());
        assert!(no.apply(&doc! { b: 1 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_exists_through_array_without_field() {
        let yes = ExistsFilter::new("a.b".to_string(), true);
        let mut ctx = MatchContext::new();
        assert!(!yes.apply(&doc! { a: [{ c: 1 }] }, &mut ctx).unwrap());
        assert!(yes.apply(&doc! { a: [{ b: 1 }] }, &mut ctx).unwrap());
    }

    #[test]
    fn test_type_filter() {
        let filter = TypeFilter::new("a".to_string(), vec![TypeMatcher::Code(2)]);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: "text" }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());

        let number = TypeFilter::new("a".to_string(), vec![TypeMatcher::Number]);
        assert!(number.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        assert!(number.apply(&doc! { a: 5.5 }, &mut ctx).unwrap());
        assert!(!number.apply(&doc! { a: "5" }, &mut ctx).unwrap());
    }

    #[test]
    fn test_size_filter() {
        let filter = SizeFilter::new("a".to_string(), 2);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: [1, 2] }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: [1] }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 2 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_mod_filter() {
        let filter = ModFilter::new("a".to_string(), 4, 1);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 6 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: "5" }, &mut ctx).unwrap());
    }
}
