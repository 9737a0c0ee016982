use crate::common::Value;
use crate::errors::DolomiteError;

/// Summary of an update operation.
#[derive(Clone, Debug, Default)]
pub struct UpdateResult {
    matched: usize,
    modified: usize,
    upserted_id: Option<Value>,
}

impl UpdateResult {
    pub(crate) fn new(matched: usize, modified: usize, upserted_id: Option<Value>) -> Self {
        UpdateResult {
            matched,
            modified,
            upserted_id,
        }
    }

    /// Number of documents the selector matched.
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Number of documents that actually changed; a no-op `$set` counts as
    /// matched but not modified.
    pub fn modified(&self) -> usize {
        self.modified
    }

    /// The `_id` of the document inserted by an upsert, if one was.
    pub fn upserted_id(&self) -> Option<&Value> {
        self.upserted_id.as_ref()
    }
}

/// Summary of a delete operation.
#[derive(Clone, Debug, Default)]
pub struct DeleteResult {
    deleted: usize,
}

impl DeleteResult {
    pub(crate) fn new(deleted: usize) -> Self {
        DeleteResult { deleted }
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }
}

/// One failed write within a batch, retaining the batch index and the
/// stable numeric code of the failure.
#[derive(Clone, Debug)]
pub struct WriteError {
    index: usize,
    code: i32,
    message: String,
}

impl WriteError {
    pub(crate) fn new(index: usize, error: &DolomiteError) -> Self {
        WriteError {
            index,
            code: error.code(),
            message: error.message().to_string(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Summary of a batch insert.
///
/// With `ordered: true` the first failure aborts the batch, so `write_errors`
/// holds at most one entry; with `ordered: false` every failure is collected
/// and the batch continues.
#[derive(Clone, Debug, Default)]
pub struct InsertManyResult {
    inserted_ids: Vec<Value>,
    write_errors: Vec<WriteError>,
}

impl InsertManyResult {
    pub(crate) fn push_inserted(&mut self, id: Value) {
        self.inserted_ids.push(id);
    }

    pub(crate) fn push_error(&mut self, error: WriteError) {
        self.write_errors.push(error);
    }

    pub fn inserted_ids(&self) -> &[Value] {
        &self.inserted_ids
    }

    pub fn inserted_count(&self) -> usize {
        self.inserted_ids.len()
    }

    pub fn write_errors(&self) -> &[WriteError] {
        &self.write_errors
    }

    pub fn has_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_update_result_accessors() {
        let result = UpdateResult::new(3, 2, Some(Value::Int32(7)));
        assert_eq!(result.matched(), 3);
        assert_eq!(result.modified(), 2);
        assert_eq!(result.upserted_id(), Some(&Value::Int32(7)));
    }

    #[test]
    fn test_write_error_captures_code() {
        let error = DolomiteError::new("E11000 duplicate key error", ErrorKind::DuplicateKey);
        let write_error = WriteError::new(4, &error);
        assert_eq!(write_error.index(), 4);
        assert_eq!(write_error.code(), 11000);
        assert!(write_error.message().contains("duplicate key"));
    }

    #[test]
    fn test_insert_many_result() {
        let mut result = InsertManyResult::default();
        result.push_inserted(Value::Int32(1));
        assert_eq!(result.inserted_count(), 1);
        assert!(!result.has_errors());
    }
}
