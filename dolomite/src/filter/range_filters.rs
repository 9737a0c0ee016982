use crate::collection::Document;
use crate::common::Value;
use crate::errors::DolomiteResult;
use crate::filter::filter::{apply_to_field_value, FilterProvider, MatchContext};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Compares two values for an ordered query predicate.
///
/// Only values of the same canonical type class have a defined order for
/// query purposes: `{field: {$gt: 5}}` never matches a string field. Numbers
/// form one class; null and missing form another.
pub(crate) fn compare_query_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null_or_missing() && b.is_null_or_missing() {
        return Some(Ordering::Equal);
    }
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return None;
    }
    if a.type_rank() != b.type_rank() {
        return None;
    }
    Some(a.compare(b))
}

macro_rules! range_filter {
    ($name:ident, $symbol:expr, $($ordering:pat_param)|+) => {
        pub(crate) struct $name {
            field: String,
            value: Value,
        }

        impl $name {
            pub(crate) fn new(field: String, value: Value) -> Self {
                Self { field, value }
            }
        }

        impl FilterProvider for $name {
            fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
                apply_to_field_value(entry, &self.field, ctx, |candidate| {
                    Ok(matches!(
                        compare_query_values(candidate, &self.value),
                        $(Some($ordering))|+
                    ))
                })
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "({} {} {})", self.field, $symbol, self.value)
            }
        }
    };
}

range_filter!(GreaterThanFilter, ">", Ordering::Greater);
range_filter!(GreaterEqualFilter, ">=", Ordering::Greater | Ordering::Equal);
range_filter!(LessThanFilter, "<", Ordering::Less);
range_filter!(LessEqualFilter, "<=", Ordering::Less | Ordering::Equal);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_greater_than() {
        let filter = GreaterThanFilter::new("a".to_string(), Value::Int32(5));
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: 6 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        // cross-type comparison does not match
        assert!(!filter.apply(&doc! { a: "6" }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { b: 1 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_numeric_widths_compare() {
        let filter = LessEqualFilter::new("a".to_string(), Value::Double(5.5));
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: 5 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 6 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_range_over_array_elements_records_position() {
        let filter = GreaterEqualFilter::new("a".to_string(), Value::Int32(10));
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: [1, 4, 12] }, &mut ctx).unwrap());
        assert_eq!(ctx.position(), Some(2));
    }

    #[test]
    fn test_gte_null_matches_null_and_missing() {
        let filter = GreaterEqualFilter::new("a".to_string(), Value::Null);
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { a: (Value::Null) }, &mut ctx).unwrap());
        assert!(filter.apply(&doc! { b: 1 }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { a: 1 }, &mut ctx).unwrap());
    }

    #[test]
    fn test_string_order() {
        let filter = LessThanFilter::new("name".to_string(), Value::from("m"));
        let mut ctx = MatchContext::new();
        assert!(filter.apply(&doc! { name: "alice" }, &mut ctx).unwrap());
        assert!(!filter.apply(&doc! { name: "zoe" }, &mut ctx).unwrap());
    }
}
