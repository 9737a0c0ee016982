#![allow(dead_code)]
//! # Dolomite - In-Process Document Database Engine
//!
//! Dolomite is an embeddable document-database engine implementing MongoDB
//! query, update, aggregation and cursor semantics against pluggable storage
//! backends. The engine accepts and returns [collection::Document] values;
//! wire-protocol framing and BSON encoding are the host server's concern.
//!
//! ## Key Features
//!
//! - **Schemaless documents**: an insertion-ordered document model with the
//!   canonical BSON value types, including the missing/null distinction
//! - **Query matching**: `$eq`, `$gt`, `$in`, `$elemMatch`, `$regex`,
//!   logical combinators, with positional match capture for `$` updates
//! - **Update operators**: `$set`, `$inc`, `$push`, `$pull`, array filters,
//!   conflict detection and upsert composition
//! - **Aggregation**: expression evaluation (`$abs`, `$cond`, `$map`, ...)
//!   and a lazy pipeline (`$match`, `$project`, `$group`, `$unwind`,
//!   `$lookup`, ...)
//! - **Cursors**: batched result retrieval with TTL-based reaping
//! - **Oplog**: an append-only log of mutations behind a pluggable sink
//! - **Pluggable storage**: collections run against any
//!   [store::DocumentStore]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dolomite::{doc, Dolomite};
//! use dolomite::collection::FindOptions;
//! use dolomite::config::EngineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Dolomite::open(EngineConfig::new())?;
//! let users = engine.collection("app.users")?;
//!
//! users.insert_one(doc! { name: "Alice", age: 30 })?;
//! users.insert_one(doc! { name: "Bob", age: 25 })?;
//!
//! let adults = users.find(
//!     &doc! { age: { "$gte": 18 } },
//!     &FindOptions::new().with_sort(&doc! { age: -1 })?,
//! )?;
//! assert_eq!(adults.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The engine is designed for multi-threaded host servers. Each collection
//! applies a single-writer / many-readers discipline; cursors hold no locks
//! between batches and observe a per-batch snapshot. Cancellation is
//! cooperative through [common::CancellationToken].
//!
//! ## Module Organization
//!
//! - [`collection`] - collections, documents, cursors and options
//! - [`common`] - the value model, path engine and shared utilities
//! - [`config`] - engine configuration
//! - [`errors`] - error types with stable numeric codes
//! - [`expression`] - aggregation expression parsing and evaluation
//! - [`filter`] - query predicate compilation and matching
//! - [`aggregation`] - pipeline stages and projection
//! - [`update`] - update operator engine
//! - [`index`] - single-field index maintenance
//! - [`store`] - storage backend abstractions
//! - [`oplog`] - operation log sinks

pub mod aggregation;
pub mod collection;
pub mod common;
pub mod config;
pub mod engine;
pub mod errors;
pub mod expression;
pub mod filter;
pub mod index;
pub mod oplog;
pub mod store;
pub mod update;

pub use crate::collection::Document;
pub use crate::common::Value;
pub use crate::engine::Dolomite;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FindOptions;
    use crate::config::EngineConfig;

    #[test]
    fn test_quick_start_flow() {
        let engine = Dolomite::open(EngineConfig::new()).unwrap();
        let users = engine.collection("app.users").unwrap();
        users.insert_one(doc! { name: "Alice", age: 30 }).unwrap();
        users.insert_one(doc! { name: "Bob", age: 25 }).unwrap();

        let adults = users
            .find(
                &doc! { age: { "$gte": 18 } },
                &FindOptions::new().with_sort(&doc! { age: (-1) }).unwrap(),
            )
            .unwrap();
        assert_eq!(adults.len(), 2);
        assert_eq!(
            adults[0].get_or_missing("name"),
            Value::from("Alice")
        );
    }
}
