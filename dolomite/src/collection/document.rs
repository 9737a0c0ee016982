use crate::collection::ObjectId;
use crate::common::{Value, DOC_ID};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use indexmap::IndexMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Represents a document: an ordered mapping from string keys to [Value]s.
///
/// Keys preserve their insertion order, and that order is observable: document
/// equality, iteration and projection output all honor it. Keys are plain
/// strings to the document itself; the path engine in
/// [`crate::common::util::document_utils`] is the only component that
/// interprets the `.` delimiter, so a key like `"x.b"` stored here is a single
/// literal key (as it appears in projection and update specifications).
///
/// The `_id` key is the primary key of a stored document. It is assigned an
/// [ObjectId] at insert time when absent and is immutable afterwards.
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    /// Checks if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top-level entries in the document.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates the specified [Value] with the specified key.
    ///
    /// If the key already exists its value is replaced in place, keeping the
    /// original position. The key is treated literally; it is never split on
    /// the path delimiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty.
    pub fn put<T: Into<Value>>(&mut self, key: &str, value: T) -> DolomiteResult<()> {
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(DolomiteError::new(
                "Document does not support empty key",
                ErrorKind::IllegalOperation,
            ));
        }
        self.data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Returns a reference to the value of a key, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns a mutable reference to the value of a key, if present.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Returns the value of a key, or [Value::Missing] if this document
    /// contains no mapping for it.
    pub fn get_or_missing(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Missing)
    }

    /// Checks if a key exists in the document.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Removes a key and returns its value, preserving the order of the
    /// remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    /// Returns the `_id` value, if the document has one.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(DOC_ID)
    }

    pub fn has_id(&self) -> bool {
        self.data.contains_key(DOC_ID)
    }

    /// Returns the `_id` value, generating and storing a fresh [ObjectId]
    /// first if the document does not have one.
    pub fn ensure_id(&mut self) -> Value {
        if let Some(id) = self.data.get(DOC_ID) {
            return id.clone();
        }
        let id = Value::ObjectId(ObjectId::new());
        // a fresh id must lead the document like it does on the wire
        let mut reordered = IndexMap::with_capacity(self.data.len() + 1);
        reordered.insert(DOC_ID.to_string(), id.clone());
        for (key, value) in self.data.drain(..) {
            reordered.insert(key, value);
        }
        self.data = reordered;
        id
    }

    /// Merges another document into this one. Nested documents merge
    /// recursively; any other value from `other` replaces the existing one.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.data.iter() {
            match (self.data.get_mut(key), value) {
                (Some(Value::Document(existing)), Value::Document(incoming)) => {
                    existing.merge(incoming);
                }
                _ => {
                    self.data.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Returns an iterator over the entries in insertion order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.data.iter()
    }

    /// Returns an iterator over the keys in insertion order.
    pub fn keys(&self) -> indexmap::map::Keys<'_, String, Value> {
        self.data.keys()
    }

    /// Returns an iterator over the values in insertion order.
    pub fn values(&self) -> indexmap::map::Values<'_, String, Value> {
        self.data.values()
    }

    /// Creates a document from key-value pairs, preserving their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> DolomiteResult<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut doc = Document::new();
        for (key, value) in pairs {
            doc.put(key.as_ref(), value)?;
        }
        Ok(doc)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        // key order is observable, so equality is order-sensitive
        self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|((key_a, value_a), (key_b, value_b))| key_a == key_b && value_a == value_b)
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for (key, value) in self.data.iter() {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        write!(f, "}}")
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

pub fn normalize_key(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// # Examples
///
/// ```rust
/// use dolomite::doc;
///
/// // Empty document
/// let empty = doc!{};
///
/// // Simple key-value pairs
/// let simple = doc!{
///     name: "Alice",
///     age: 30
/// };
///
/// // Nested documents and arrays
/// let complex = doc!{
///     user: {
///         name: "Charlie",
///         tags: ["admin", "user"]
///     },
///     values: [1, 2, 3]
/// };
/// ```
#[macro_export]
macro_rules! doc {
    // match an empty document
    () => {
        $crate::collection::Document::new()
    };

    // match a document with key value pairs
    ($($rest:tt)+) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::collection::Document::new();
            $crate::doc_pairs!(doc; $($rest)+);
            doc
        }
    };
}

/// Helper macro that munges a comma-separated list of `key : value` pairs
/// (where `value` may be a negative number literal) and inserts each into
/// `$doc`. Used internally by [doc].
#[macro_export]
#[doc(hidden)]
macro_rules! doc_pairs {
    ($doc:ident; ) => {};
    ($doc:ident; ,) => {};

    ($doc:ident; $key:tt : - $value:tt , $($rest:tt)*) => {
        $doc.put(&$crate::collection::normalize_key(stringify!($key)), $crate::doc_value!(- $value))
            .expect(&format!("Failed to put value {} in document", stringify!(-$value)));
        $crate::doc_pairs!($doc; $($rest)*);
    };
    ($doc:ident; $key:tt : - $value:tt) => {
        $doc.put(&$crate::collection::normalize_key(stringify!($key)), $crate::doc_value!(- $value))
            .expect(&format!("Failed to put value {} in document", stringify!(-$value)));
    };

    ($doc:ident; $key:tt : $value:tt , $($rest:tt)*) => {
        $doc.put(&$crate::collection::normalize_key(stringify!($key)), $crate::doc_value!($value))
            .expect(&format!("Failed to put value {} in document", stringify!($value)));
        $crate::doc_pairs!($doc; $($rest)*);
    };
    ($doc:ident; $key:tt : $value:tt) => {
        $doc.put(&$crate::collection::normalize_key(stringify!($key)), $crate::doc_value!($value))
            .expect(&format!("Failed to put value {} in document", stringify!($value)));
    };
}

/// Helper macro to convert values for the doc! macro.
/// Handles nested documents, arrays, and expressions.
#[macro_export]
macro_rules! doc_value {
    // match a nested document
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    // match an array of values
    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    // match a negative number literal
    (- $value:tt) => {
        $crate::common::Value::from(-($value))
    };

    // match an expression (variable, function call, literal, etc.)
    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
