use crate::collection::Document;
use crate::errors::DolomiteResult;
use crate::store::{DocumentStore, Position};
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory document store backed by a concurrent skip list.
///
/// Positions are monotonically increasing, so iteration observes insertion
/// order. The skip list allows concurrent readers without locking; the
/// engine's collection lock serializes writers.
#[derive(Default)]
pub struct MemoryStore {
    documents: SkipMap<u64, Document>,
    next_position: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            documents: SkipMap::new(),
            next_position: AtomicU64::new(1),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn iter_all(&self) -> DolomiteResult<Vec<(Position, Document)>> {
        Ok(self
            .documents
            .iter()
            .map(|entry| (Position(*entry.key()), entry.value().clone()))
            .collect())
    }

    fn get(&self, position: Position) -> DolomiteResult<Option<Document>> {
        Ok(self
            .documents
            .get(&position.0)
            .map(|entry| entry.value().clone()))
    }

    fn insert(&self, document: Document) -> DolomiteResult<Position> {
        let position = self.next_position.fetch_add(1, Ordering::Relaxed);
        self.documents.insert(position, document);
        Ok(Position(position))
    }

    fn update(&self, position: Position, document: Document) -> DolomiteResult<()> {
        self.documents.insert(position.0, document);
        Ok(())
    }

    fn remove(&self, position: Position) -> DolomiteResult<Option<Document>> {
        Ok(self
            .documents
            .remove(&position.0)
            .map(|entry| entry.value().clone()))
    }

    fn len(&self) -> DolomiteResult<usize> {
        Ok(self.documents.len())
    }

    fn clear(&self) -> DolomiteResult<()> {
        self.documents.clear();
        Ok(())
    }
}
