use crate::collection::Document;
use crate::common::util::document_utils::get_subdocument_value_collection_aware;
use crate::common::Value;
use crate::errors::DolomiteResult;
use crate::filter::basic_filters::AllFilter;
use crate::filter::logical_filters::{AndFilter, NotFilter, OrFilter};
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

/// Per-evaluation state of the matcher.
///
/// Records the array index of the first matching element so that the path
/// engine can resolve the positional `$` operator. The context is an explicit
/// parameter, never thread-local state.
#[derive(Default)]
pub struct MatchContext {
    position: Option<usize>,
}

impl MatchContext {
    pub fn new() -> Self {
        MatchContext::default()
    }

    /// Records a match position unless one was already recorded; the first
    /// array match of a query wins.
    pub fn record(&mut self, position: usize) {
        if self.position.is_none() {
            self.position = Some(position);
        }
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Takes the recorded position, leaving the context empty.
    pub fn take(&mut self) -> Option<usize> {
        self.position.take()
    }
}

/// Trait for implementing query predicates.
///
/// A `FilterProvider` decides whether a candidate document matches, and may
/// record a positional match in the context.
pub trait FilterProvider: Send + Sync + Display {
    /// Applies the filter to a document and returns whether it matches.
    fn apply(&self, entry: &Document, ctx: &mut MatchContext) -> DolomiteResult<bool>;
}

/// A compiled query predicate for selecting documents from a collection.
///
/// `Filter` wraps a provider implementation behind an `Arc`, so a compiled
/// query is cheap to clone and can be reused across a multi-document pass
/// without re-parsing.
///
/// # Filter Composition
///
/// Filters compose with logical operators:
/// - `and(other)` - both filters must match
/// - `or(other)` - either filter matches
/// - `not()` - negates the filter
#[derive(Clone)]
pub struct Filter {
    inner: Arc<dyn FilterProvider>,
}

impl Filter {
    /// Creates a new filter from a provider implementation.
    pub fn new<T: FilterProvider + 'static>(inner: T) -> Self {
        Filter {
            inner: Arc::new(inner),
        }
    }

    /// Combines this filter with another using logical AND.
    pub fn and(&self, filter: Filter) -> Self {
        Filter::new(AndFilter::new(vec![self.clone(), filter]))
    }

    /// Combines this filter with another using logical OR.
    pub fn or(&self, filter: Filter) -> Self {
        Filter::new(OrFilter::new(vec![self.clone(), filter]))
    }

    /// Negates this filter using logical NOT.
    pub fn not(&self) -> Self {
        Filter::new(NotFilter::new(self.clone()))
    }

    /// Applies the filter with a fresh context, returning the match outcome
    /// and the recorded positional index, if any.
    pub fn matches(&self, entry: &Document) -> DolomiteResult<(bool, Option<usize>)> {
        let mut ctx = MatchContext::new();
        let matched = self.inner.apply(entry, &mut ctx)?;
        Ok((matched, ctx.take()))
    }
}

impl Display for Filter {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::fmt::Debug for Filter {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl Deref for Filter {
    type Target = Arc<dyn FilterProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Creates a filter that matches all documents.
pub fn all() -> Filter {
    Filter::new(AllFilter)
}

/// Resolves a field for a predicate and applies it with the implicit array
/// semantics of the matcher: the predicate is tried against the whole value
/// first, then against each array element, recording the index of the first
/// element that matches.
pub(crate) fn apply_to_field_value<F>(
    entry: &Document,
    field: &str,
    ctx: &mut MatchContext,
    predicate: F,
) -> DolomiteResult<bool>
where
    F: Fn(&Value) -> DolomiteResult<bool>,
{
    let value = get_subdocument_value_collection_aware(entry, field)?;
    if predicate(&value)? {
        return Ok(true);
    }
    if let Value::Array(items) = &value {
        for (index, item) in items.iter().enumerate() {
            if predicate(item)? {
                ctx.record(index);
                return Ok(true);
            }
        }
    }
    Ok(false)
}
