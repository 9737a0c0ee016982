use crate::collection::Document;
use crate::errors::DolomiteResult;
use crate::expression::Expr;
use crate::filter::filter::{Filter, FilterProvider, MatchContext};
use std::fmt::{Display, Formatter};

/// Matches documents satisfying every sub-filter.
pub(crate) struct AndFilter {
    filters: Vec<Filter>,
}

impl AndFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        AndFilter { filters }
    }
}

impl FilterProvider for AndFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        for filter in &self.filters {
            if !filter.apply(entry, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Display for AndFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                write!(f, " && ")?;
            }
            write!(f, "{}", filter)?;
        }
        write!(f, ")")
    }
}

/// Matches documents satisfying at least one sub-filter.
pub(crate) struct OrFilter {
    filters: Vec<Filter>,
}

impl OrFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        OrFilter { filters }
    }
}

impl FilterProvider for OrFilter {
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool> {
        for filter in &self.filters {
            if filter.apply(entry, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Display for OrFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                write!(f, " || ")?;
            }
            write!(f, "{}", filter)?;
        }
        write!(f, ")")
    }
}

/// Matches documents satisfying none of the sub-filters.
pub(crate) struct NorFilter {
    filters: Vec<Filter>,
}

impl NorFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        NorFilter { filters }
    }
}

impl FilterProvider for NorFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let mut scratch = MatchContext::new();
        for filter in &self.filters {
            if filter.apply(entry, &mut scratch)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Display for NorFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(nor of {} filters)", self.filters.len())
    }
}

/// Negates a filter. Positional matches recorded inside a negated context
/// are discarded.
pub(crate) struct NotFilter {
    filter: Filter,
}

impl NotFilter {
    pub(crate) fn new(filter: Filter) -> Self {
        NotFilter { filter }
    }
}

impl FilterProvider for NotFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        let mut scratch = MatchContext::new();
        Ok(!self.filter.apply(entry, &mut scratch)?)
    }
}

impl Display for NotFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "!({})", self.filter)
    }
}

/// Matches documents for which an aggregation expression is truthy.
pub(crate) struct ExprFilter {
    expression: Expr,
}

impl ExprFilter {
    pub(crate) fn new(expression: Expr) -> Self {
        ExprFilter { expression }
    }
}

impl FilterProvider for ExprFilter {
    fn apply(&self, entry: &Document, _ctx: &mut MatchContext) -> DolomiteResult<bool> {
        Ok(self.expression.evaluate(entry)?.is_truthy())
    }
}

impl Display for ExprFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "($expr)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::doc;
    use crate::filter::basic_filters::EqualsFilter;

    fn eq(field: &str, value: i32) -> Filter {
        Filter::new(EqualsFilter::new(field.to_string(), Value::Int32(value)))
    }

    #[test]
    fn test_and_or_nor() {
        let doc = doc! { a: 1, b: 2 };
        let mut ctx = MatchContext::new();
        assert!(AndFilter::new(vec![eq("a", 1), eq("b", 2)])
            .apply(&doc, &mut ctx)
            .unwrap());
        assert!(!AndFilter::new(vec![eq("a", 1), eq("b", 3)])
            .apply(&doc, &mut ctx)
            .unwrap());
        assert!(OrFilter::new(vec![eq("a", 9), eq("b", 2)])
            .apply(&doc, &mut ctx)
            .unwrap());
        assert!(NorFilter::new(vec![eq("a", 9), eq("b", 9)])
            .apply(&doc, &mut ctx)
            .unwrap());
        assert!(!NorFilter::new(vec![eq("a", 1)])
            .apply(&doc, &mut ctx)
            .unwrap());
    }

    #[test]
    fn test_not_discards_position() {
        let doc = doc! { a: [5] };
        let mut ctx = MatchContext::new();
        let not = NotFilter::new(eq("a", 7));
        assert!(not.apply(&doc, &mut ctx).unwrap());
        assert_eq!(ctx.position(), None);
    }

    #[test]
    fn test_expr_filter() {
        let expression =
            Expr::parse(&Value::Document(doc! { "$gt": ["$spent", "$budget"] })).unwrap();
        let filter = ExprFilter::new(expression);
        let mut ctx = MatchContext::new();
        assert!(filter
            .apply(&doc! { spent: 120, budget: 100 }, &mut ctx)
            .unwrap());
        assert!(!filter
            .apply(&doc! { spent: 80, budget: 100 }, &mut ctx)
            .unwrap());
    }
}
