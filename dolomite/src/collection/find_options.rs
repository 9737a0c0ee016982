use crate::aggregation::{Projection, SortSpec};
use crate::collection::Document;
use crate::errors::DolomiteResult;

/// Options for find operations: skip, limit, sort, projection, batch size
/// and a time budget.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::collection::FindOptions;
/// use dolomite::doc;
///
/// let options = FindOptions::new()
///     .with_sort(&doc! { age: -1 })?
///     .with_skip(10)
///     .with_limit(5);
/// ```
#[derive(Clone, Default)]
pub struct FindOptions {
    skip: usize,
    limit: Option<usize>,
    sort: Option<SortSpec>,
    projection: Option<Projection>,
    batch_size: Option<usize>,
    max_time_ms: Option<u64>,
}

impl FindOptions {
    pub fn new() -> FindOptions {
        FindOptions::default()
    }

    pub fn with_skip(mut self, skip: usize) -> FindOptions {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> FindOptions {
        self.limit = Some(limit);
        self
    }

    /// Parses and attaches a `{field: 1|-1}` sort specification.
    pub fn with_sort(mut self, spec: &Document) -> DolomiteResult<FindOptions> {
        self.sort = Some(SortSpec::parse(spec)?);
        Ok(self)
    }

    /// Parses and attaches a projection. An empty specification document
    /// means no projection.
    pub fn with_projection(mut self, spec: &Document) -> DolomiteResult<FindOptions> {
        if !spec.is_empty() {
            self.projection = Some(Projection::new(spec)?);
        }
        Ok(self)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> FindOptions {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_max_time_ms(mut self, max_time_ms: u64) -> FindOptions {
        self.max_time_ms = Some(max_time_ms);
        self
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn max_time_ms(&self) -> Option<u64> {
        self.max_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_defaults() {
        let options = FindOptions::new();
        assert_eq!(options.skip(), 0);
        assert_eq!(options.limit(), None);
        assert!(options.sort().is_none());
        assert!(options.projection().is_none());
        assert_eq!(options.batch_size(), None);
    }

    #[test]
    fn test_with_sort_validates() {
        assert!(FindOptions::new().with_sort(&doc! { a: 1 }).is_ok());
        assert!(FindOptions::new().with_sort(&doc! { a: 2 }).is_err());
    }

    #[test]
    fn test_empty_projection_means_none() {
        let options = FindOptions::new().with_projection(&doc! {}).unwrap();
        assert!(options.projection().is_none());
        let options = FindOptions::new().with_projection(&doc! { a: 1 }).unwrap();
        assert!(options.projection().is_some());
    }
}
