//! Collections, documents and cursors.

#[allow(clippy::module_inception)]
mod collection;
mod cursor;
mod document;
mod find_options;
mod object_id;
mod update_options;
mod write_result;

pub use collection::{Collection, FindAndModifyOptions};
pub use cursor::CursorRegistry;
pub(crate) use cursor::CursorReaper;
pub use document::{normalize_key, Document};
pub use find_options::FindOptions;
pub use object_id::ObjectId;
pub use update_options::{multi, upsert, UpdateOptions};
pub use write_result::{DeleteResult, InsertManyResult, UpdateResult, WriteError};
