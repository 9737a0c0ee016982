use crate::collection::Document;
use crate::common::util::document_utils::get_subdocument_value_collection_aware;
use crate::common::Value;
use crate::errors::DolomiteResult;
use crate::filter::filter::{Filter, FilterProvider, MatchContext};
use std::fmt::{Display, Formatter};

/// Synthetic key used to apply operator-form `$elemMatch` conditions to a
/// bare array element.
pub(crate) const ELEMENT_FIELD: &str = "$elemMatchItem";

/// The condition form of an `$elemMatch`.
pub(crate) enum ElementCondition {
    /// A full sub-query matched against document elements.
    Query(Filter),
    /// Comparison operators applied to the element value itself, compiled
    /// against [ELEMENT_FIELD].
    Operators(Filter),
}

/// Matches array fields where at least one element satisfies a condition,
/// recording the index of the first such element for positional updates.
pub(crate) struct ElementMatchFilter {
    field: String,
    condition: ElementCondition,
}

impl ElementMatchFilter {
    pub(crate) fn new(field: String, condition: ElementCondition) -> Self {
        ElementMatchFilter { field, condition }
    }

    fn element_matches(&self, element: &Value) -> DolomiteResult<bool> {
        let mut scratch = MatchContext::new();
        match &self.condition {
            ElementCondition::Query(filter) => match element {
                Value::Document(doc) => filter.apply(doc, &mut scratch),
                _ => Ok(false),
            },
            ElementCondition::Operators(filter) => {
                let mut wrapper = Document::new();
                wrapper.put(ELEMENT_FIELD, element.clone())?;
                filter.apply(&wrapper, &mut scratch)
            }
        }
    }
}

impl FilterProvider for ElementMatchFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let value = get_subdocument_value_collection_aware(entry, &self.field)?;
        let Value::Array(items) = value else {
            return Ok(false);
        };
        for (index, element) in items.iter().enumerate() {
            if self.element_matches(element)? {
                ctx.record(index);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Display for ElementMatchFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.condition {
            ElementCondition::Query(filter) => {
                write!(f, "({} elemMatch {})", self.field, filter)
            }
            ElementCondition::Operators(filter) => {
                write!(f, "({} elemMatch ops {})", self.field, filter)
            }
        }
    }
}

/// Matches fields containing every one of the listed conditions (`$all`).
pub(crate) struct ContainsAllFilter {
    field: String,
    conditions: Vec<Filter>,
}

impl ContainsAllFilter {
    pub(crate) fn new(field: String, conditions: Vec<Filter>) -> Self {
        ContainsAllFilter { field, conditions }
    }
}

impl FilterProvider for ContainsAllFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        for condition in &self.conditions {
            if !condition.apply(entry, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Display for ContainsAllFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} all of {} conditions)", self.field, self.conditions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::parse_query;

    #[test]
    fn test_elem_match_query_form_records_position() {
        let filter = parse_query(&doc! { arr: { "$elemMatch": { x: 1 } } }).unwrap();
        let doc = doc! { arr: [{ x: 0 }, { x: 1 }, { x: 1 }] };
        let (matched, position) = filter.matches(&doc).unwrap();
        assert!(matched);
        assert_eq!(position, Some(1));

        let (matched, _) = filter.matches(&doc! { arr: [{ x: 0 }] }).unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_elem_match_operator_form() {
        let filter =
            parse_query(&doc! { scores: { "$elemMatch": { "$gte": 80, "$lt": 85 } } }).unwrap();
        let (matched, position) = filter.matches(&doc! { scores: [95, 82, 90] }).unwrap();
        assert!(matched);
        assert_eq!(position, Some(1));

        let (matched, _) = filter.matches(&doc! { scores: [95, 90] }).unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_elem_match_requires_array() {
        let filter = parse_query(&doc! { arr: { "$elemMatch": { x: 1 } } }).unwrap();
        let (matched, _) = filter.matches(&doc! { arr: { x: 1 } }).unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_all_filter_with_plain_values() {
        let filter = parse_query(&doc! { tags: { "$all": ["a", "b"] } }).unwrap();
        assert!(filter.matches(&doc! { tags: ["b", "c", "a"] }).unwrap().0);
        assert!(!filter.matches(&doc! { tags: ["a", "c"] }).unwrap().0);
        // a scalar field satisfies a single-element $all
        let single = parse_query(&doc! { tags: { "$all": ["a"] } }).unwrap();
        assert!(single.matches(&doc! { tags: "a" }).unwrap().0);
    }

    #[test]
    fn test_all_filter_with_elem_match_members() {
        let filter = parse_query(&doc! { items: { "$all": [
            { "$elemMatch": { size: "M" } },
            { "$elemMatch": { num: 100 } },
        ] } })
        .unwrap();
        let doc = doc! { items: [{ size: "S", num: 100 }, { size: "M", num: 50 }] };
        assert!(filter.matches(&doc).unwrap().0);
        let doc = doc! { items: [{ size: "S", num: 100 }] };
        assert!(!filter.matches(&doc).unwrap().0);
    }
}
