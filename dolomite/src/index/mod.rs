//! Single-field index maintenance.
//!
//! Indexes are maintained inline with every write, under the collection's
//! exclusive lock, so an update is observed atomically with its index
//! changes. Only the automatic `_id_` index and user single-field indexes
//! are supported.

use crate::collection::Document;
use crate::common::util::document_utils::get_subdocument_value;
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::store::Position;
use std::collections::BTreeMap;

/// Describes a single-field index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescriptor {
    name: String,
    field: String,
    unique: bool,
}

impl IndexDescriptor {
    pub fn new(field: &str, unique: bool) -> IndexDescriptor {
        IndexDescriptor {
            name: format!("{}_1", field),
            field: field.to_string(),
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// One maintained index: a sorted mapping from key values to positions.
///
/// Array field values index each element (multikey); missing fields index
/// as null. Keys are stored normalized so that numeric widths collapse.
pub(crate) struct Index {
    descriptor: IndexDescriptor,
    entries: BTreeMap<Value, Vec<Position>>,
}

impl Index {
    pub(crate) fn new(descriptor: IndexDescriptor) -> Index {
        Index {
            descriptor,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn keys_of(&self, document: &Document) -> Vec<Value> {
        let value = get_subdocument_value(document, self.descriptor.field())
            .unwrap_or(Value::Missing);
        match value {
            Value::Missing => vec![Value::Null],
            Value::Array(items) if !items.is_empty() => {
                items.iter().map(|item| item.normalized()).collect()
            }
            other => vec![other.normalized()],
        }
    }

    /// Checks that adding a document would not violate a unique constraint.
    pub(crate) fn check_unique(&self, document: &Document, ns: &str) -> DolomiteResult<()> {
        if !self.descriptor.is_unique() {
            return Ok(());
        }
        for key in self.keys_of(document) {
            if self
                .entries
                .get(&key)
                .is_some_and(|positions| !positions.is_empty())
            {
                log::error!(
                    "Duplicate key {} for unique index {} on {}",
                    key,
                    self.descriptor.name(),
                    ns
                );
                return Err(DolomiteError::new(
                    &format!(
                        "E11000 duplicate key error collection: {} index: {} dup key: {{ {}: {} }}",
                        ns,
                        self.descriptor.name(),
                        self.descriptor.field(),
                        key
                    ),
                    ErrorKind::DuplicateKey,
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn add(&mut self, document: &Document, position: Position) {
        for key in self.keys_of(document) {
            self.entries.entry(key).or_default().push(position);
        }
    }

    pub(crate) fn remove(&mut self, document: &Document, position: Position) {
        for key in self.keys_of(document) {
            if let Some(positions) = self.entries.get_mut(&key) {
                positions.retain(|existing| *existing != position);
                if positions.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
