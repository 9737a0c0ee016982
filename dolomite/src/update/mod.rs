//! Update operator parsing and application.
//!
//! An update document parses once into an [UpdateEngine]; the engine is then
//! applied to every matched document of a multi-update without re-parsing,
//! sharing its compiled predicates (`$pull` conditions, array filters) across
//! the pass.

mod array_filters;
mod engine;
mod operators;

pub use array_filters::ArrayFilter;
pub use engine::UpdateEngine;
