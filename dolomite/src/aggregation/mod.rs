//! Aggregation pipeline execution.
//!
//! Stages parse once into a [pipeline::Pipeline] and compose lazily over a
//! document stream. `$sort`, `$group`, `$sample` and `$count` are blocking
//! stages; everything else streams.

pub(crate) mod accumulators;
pub mod pipeline;
pub mod projection;
pub(crate) mod stages;

pub use pipeline::Pipeline;
pub use projection::Projection;
pub use stages::SortSpec;
