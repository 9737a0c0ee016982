use crate::collection::Document;

/// Options controlling an update operation.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::collection::{multi, upsert, UpdateOptions};
///
/// // Update every matching document
/// let options = multi();
///
/// // Insert a composed document if nothing matched
/// let options = upsert();
/// ```
#[derive(Default)]
pub struct UpdateOptions {
    multi: bool,
    upsert: bool,
    array_filters: Vec<Document>,
}

impl UpdateOptions {
    pub fn new(multi: bool, upsert: bool) -> UpdateOptions {
        UpdateOptions {
            multi,
            upsert,
            array_filters: Vec::new(),
        }
    }

    /// Attaches `arrayFilters` documents binding `$[ident]` placeholders.
    pub fn with_array_filters(mut self, array_filters: Vec<Document>) -> UpdateOptions {
        self.array_filters = array_filters;
        self
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    pub fn array_filters(&self) -> &[Document] {
        &self.array_filters
    }
}

/// Creates options that update every matching document.
pub fn multi() -> UpdateOptions {
    UpdateOptions::new(true, false)
}

/// Creates options that insert a composed document when nothing matched.
pub fn upsert() -> UpdateOptions {
    UpdateOptions::new(false, true)
}
