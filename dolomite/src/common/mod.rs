pub mod cancel;
pub mod decimal;
pub mod util;
pub mod value;

pub use cancel::CancellationToken;
pub use decimal::Decimal128;
pub use value::{null_aware_equals, Value};

// doc constants
pub const DOC_ID: &str = "_id";
pub const ID_INDEX_NAME: &str = "_id_";

// path constants
pub const PATH_DELIMITER: &str = ".";
pub const POSITIONAL_FRAGMENT: &str = "$";

// keys that are allowed to keep their `$` prefix inside stored documents
pub const REFERENCE_KEYS: [&str; 3] = ["$ref", "$id", "$db"];

// namespace constants
pub const NAMESPACE_SEPARATOR: &str = ".";
