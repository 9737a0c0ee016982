//! Storage backend abstractions.
//!
//! The engine consumes a per-collection [DocumentStore] and never assumes
//! persistence; in-memory and file-backed stores are interchangeable behind
//! this trait.

pub mod memory;

pub use memory::MemoryStore;

use crate::collection::Document;
use crate::errors::DolomiteResult;
use std::fmt::Debug;

/// An opaque handle to a stored document's location within a backend.
///
/// Positions are assigned by the store on insert and stay valid until the
/// document is removed. Their numeric content carries no meaning to the
/// engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Position(pub u64);

/// Contract between the engine and a per-collection storage backend.
///
/// Implementations must be `Send + Sync`; the engine serializes writes per
/// collection through its own lock discipline, so stores may assume at most
/// one writer at a time but concurrent readers.
pub trait DocumentStore: Send + Sync {
    /// Iterates all stored documents with their positions, in position
    /// order.
    fn iter_all(&self) -> DolomiteResult<Vec<(Position, Document)>>;

    /// Looks up the document at a position.
    fn get(&self, position: Position) -> DolomiteResult<Option<Document>>;

    /// Stores a new document and returns its position.
    fn insert(&self, document: Document) -> DolomiteResult<Position>;

    /// Replaces the document at an existing position.
    fn update(&self, position: Position, document: Document) -> DolomiteResult<()>;

    /// Removes and returns the document at a position.
    fn remove(&self, position: Position) -> DolomiteResult<Option<Document>>;

    /// Number of stored documents.
    fn len(&self) -> DolomiteResult<usize>;

    fn is_empty(&self) -> DolomiteResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every stored document.
    fn clear(&self) -> DolomiteResult<()>;
}
