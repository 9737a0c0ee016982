use crate::collection::{Document, ObjectId};
use crate::common::Decimal128;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Represents a [Document] value. It can be a simple value like [Value::Int32],
/// [Value::String] or a complex value like [Value::Document] or [Value::Array].
///
/// # Purpose
/// Provides a unified representation for every value that can be stored in a
/// document. The variant set mirrors the canonical BSON types, with two
/// additions that are never stored: [Value::Missing], the sentinel produced by
/// path traversal when a field is absent (distinct from [Value::Null]), and
/// [Value::Undefined], the deprecated legacy type kept for wire compatibility.
///
/// # Characteristics
/// - **Comparable**: implements the canonical cross-type ordering, so values
///   of any two types have a defined relative order
/// - **Numeric equality**: `Int32(5)`, `Int64(5)` and `Double(5.0)` are equal;
///   a long that cannot be represented exactly as a double keeps its identity
/// - **Hashable**: hashing is consistent with the numeric equality rules
/// - **Serializable**: can be serialized/deserialized with serde
/// - **Default**: defaults to Null
///
/// # Usage
/// Create values using the From trait or the doc! macro:
/// ```text
/// let v1: Value = 42.into();
/// let v2 = Value::from("hello");
/// let doc = doc! { "age": 42, "name": "Alice" };
/// ```
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub enum Value {
    /// The absent-field sentinel. Never stored in a document.
    Missing,
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 32-bit integer value.
    Int32(i32),
    /// Represents a signed 64-bit integer value.
    Int64(i64),
    /// Represents a 64-bit floating point value.
    Double(f64),
    /// Represents a 128-bit decimal value.
    Decimal128(Decimal128),
    /// Represents a string value.
    String(String),
    /// Represents a 12-byte unique identifier.
    ObjectId(ObjectId),
    /// Represents a UTC instant with millisecond precision.
    Date(DateTime<Utc>),
    /// Represents an internal timestamp: seconds plus an ordinal within the second.
    Timestamp { time: u32, increment: u32 },
    /// Represents binary data with a subtype tag. Not queryable by comparison.
    Binary { subtype: u8, bytes: Vec<u8> },
    /// Represents a regular expression with its option flags.
    Regex { pattern: String, options: String },
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents a nested document value.
    Document(Document),
    /// Smaller than every other value.
    MinKey,
    /// Larger than every other value.
    MaxKey,
    /// Deprecated legacy type.
    Undefined,
}

impl Value {
    /// Creates a new [Value] from the given value that implements [`Into<Value>`].
    pub fn from<T: Into<Value>>(value: T) -> Value {
        value.into()
    }

    /// Creates a new [Value] from the given [Option] value. [None] becomes
    /// [Value::Null].
    pub fn from_option<T: Into<Value>>(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checks whether this value is null, missing or undefined.
    pub fn is_null_or_missing(&self) -> bool {
        matches!(self, Value::Null | Value::Missing | Value::Undefined)
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal128(_)
        )
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Evaluates the truthiness of this value: `false` for missing, null,
    /// undefined, numeric zero and NaN; `true` for everything else, including
    /// the empty string and the empty document.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Missing | Value::Null | Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Int32(n) => *n != 0,
            Value::Int64(n) => *n != 0,
            Value::Double(d) => *d != 0.0 && !d.is_nan(),
            Value::Decimal128(d) => !d.is_zero(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the exact `i64` value of an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            Value::Double(d) => {
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    Some(*d as i64)
                } else {
                    None
                }
            }
            Value::Decimal128(d) => d.to_i64(),
            _ => None,
        }
    }

    /// Returns the numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(n) => Some(f64::from(*n)),
            Value::Int64(n) => Some(*n as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal128(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Value::ObjectId(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(instant) => Some(instant),
            _ => None,
        }
    }

    /// Returns the canonical type name of this value.
    pub fn describe_type(&self) -> &'static str {
        match self {
            Value::Missing => "missing",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal128(_) => "decimal",
            Value::String(_) => "string",
            Value::ObjectId(_) => "objectId",
            Value::Date(_) => "date",
            Value::Timestamp { .. } => "timestamp",
            Value::Binary { .. } => "binData",
            Value::Regex { .. } => "regex",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
            Value::MinKey => "minKey",
            Value::MaxKey => "maxKey",
            Value::Undefined => "undefined",
        }
    }

    /// Returns the numeric BSON type code, or `None` for the missing sentinel.
    pub fn type_number(&self) -> Option<i32> {
        match self {
            Value::Missing => None,
            Value::Double(_) => Some(1),
            Value::String(_) => Some(2),
            Value::Document(_) => Some(3),
            Value::Array(_) => Some(4),
            Value::Binary { .. } => Some(5),
            Value::Undefined => Some(6),
            Value::ObjectId(_) => Some(7),
            Value::Bool(_) => Some(8),
            Value::Date(_) => Some(9),
            Value::Null => Some(10),
            Value::Regex { .. } => Some(11),
            Value::Int32(_) => Some(16),
            Value::Timestamp { .. } => Some(17),
            Value::Int64(_) => Some(18),
            Value::Decimal128(_) => Some(19),
            Value::MinKey => Some(-1),
            Value::MaxKey => Some(127),
        }
    }

    /// Returns the rank of this value in the canonical cross-type sort order.
    ///
    /// Values with the same rank form an equality class and are compared by
    /// their natural order; values with different ranks compare by rank.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::MinKey => 0,
            Value::Missing | Value::Null | Value::Undefined => 5,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal128(_) => 10,
            Value::String(_) => 15,
            Value::Document(_) => 20,
            Value::Array(_) => 25,
            Value::Binary { .. } => 30,
            Value::ObjectId(_) => 35,
            Value::Bool(_) => 40,
            Value::Date(_) => 45,
            Value::Timestamp { .. } => 50,
            Value::Regex { .. } => 55,
            Value::MaxKey => 60,
        }
    }

    /// Normalizes this value for equality checks.
    ///
    /// Integral numbers representable as a long collapse to [Value::Int64];
    /// other numbers collapse to [Value::Double] with `-0.0` mapped to `0.0`.
    /// A long that cannot be represented exactly as a double keeps its long
    /// identity. Documents and arrays normalize recursively, preserving order.
    pub fn normalized(&self) -> Value {
        match self {
            Value::Int32(n) => Value::Int64(i64::from(*n)),
            Value::Int64(n) => Value::Int64(*n),
            Value::Double(d) => normalize_double(*d),
            Value::Decimal128(d) => match d.to_i64() {
                Some(n) => Value::Int64(n),
                None => normalize_double(d.to_f64()),
            },
            Value::Document(doc) => {
                let mut normalized = Document::new();
                for (key, value) in doc.iter() {
                    // keys of a freshly built document are never empty
                    let _ = normalized.put(key, value.normalized());
                }
                Value::Document(normalized)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| item.normalized()).collect())
            }
            other => other.clone(),
        }
    }

    /// Compares two values using the canonical cross-type order.
    ///
    /// Within the numeric rank, integers compare exactly and NaN sorts below
    /// every other number. Within the null rank, `Missing < Undefined < Null`
    /// keeps the order total and deterministic.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => compare_numbers(a, b),
            (a, b) if a.is_null_or_missing() && b.is_null_or_missing() => {
                null_class_rank(a).cmp(&null_class_rank(b))
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => compare_documents(a, b),
            (Value::Array(a), Value::Array(b)) => compare_arrays(a, b),
            (
                Value::Binary {
                    subtype: sub_a,
                    bytes: bytes_a,
                },
                Value::Binary {
                    subtype: sub_b,
                    bytes: bytes_b,
                },
            ) => bytes_a
                .len()
                .cmp(&bytes_b.len())
                .then_with(|| sub_a.cmp(sub_b))
                .then_with(|| bytes_a.cmp(bytes_b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (
                Value::Timestamp {
                    time: time_a,
                    increment: inc_a,
                },
                Value::Timestamp {
                    time: time_b,
                    increment: inc_b,
                },
            ) => time_a.cmp(time_b).then_with(|| inc_a.cmp(inc_b)),
            (
                Value::Regex {
                    pattern: pat_a,
                    options: opt_a,
                },
                Value::Regex {
                    pattern: pat_b,
                    options: opt_b,
                },
            ) => pat_a.cmp(pat_b).then_with(|| opt_a.cmp(opt_b)),
            _ => Ordering::Equal,
        }
    }
}

/// Checks whether two values are equal, treating null, missing and undefined
/// as one equality class. Used by query predicates; plain [Value] equality
/// keeps the sentinel distinct.
pub fn null_aware_equals(a: &Value, b: &Value) -> bool {
    if a.is_null_or_missing() && b.is_null_or_missing() {
        return true;
    }
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return false;
    }
    a == b
}

fn cannot_be_represented_as_double(value: i64) -> bool {
    value != (value as f64) as i64
}

fn normalize_double(value: f64) -> Value {
    let value = if value == -0.0 { 0.0 } else { value };
    if value.fract() == 0.0
        && value.is_finite()
        && value >= i64::MIN as f64
        && value <= i64::MAX as f64
    {
        Value::Int64(value as i64)
    } else {
        Value::Double(value)
    }
}

fn null_class_rank(value: &Value) -> u8 {
    match value {
        Value::Missing => 0,
        Value::Undefined => 1,
        _ => 2,
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    // NaN sorts below every other number
    let a_nan = matches!(a, Value::Double(d) if d.is_nan());
    let b_nan = matches!(b, Value::Double(d) if d.is_nan());
    match (a_nan, b_nan) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    // exact integer comparison when both sides are integral
    if let (Some(int_a), Some(int_b)) = (a.as_i64(), b.as_i64()) {
        return int_a.cmp(&int_b);
    }

    // a decimal operand compares in decimal space when possible
    if let (Value::Decimal128(dec_a), Value::Decimal128(dec_b)) = (a, b) {
        return dec_a.cmp(dec_b);
    }

    let double_a = a.as_f64().unwrap_or(f64::NAN);
    let double_b = b.as_f64().unwrap_or(f64::NAN);
    double_a.partial_cmp(&double_b).unwrap_or(Ordering::Equal)
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((key_a, value_a), (key_b, value_b)) in a.iter().zip(b.iter()) {
        let key_order = key_a.cmp(key_b);
        if key_order != Ordering::Equal {
            return key_order;
        }
        let value_order = value_a.compare(value_b);
        if value_order != Ordering::Equal {
            return value_order;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (value_a, value_b) in a.iter().zip(b.iter()) {
        let order = value_a.compare(value_b);
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.is_number() && other.is_number() {
            return compare_numbers(self, other) == Ordering::Equal;
        }

        match (self, other) {
            (Value::Missing, Value::Missing) => true,
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::ObjectId(a), Value::ObjectId(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (
                Value::Timestamp {
                    time: time_a,
                    increment: inc_a,
                },
                Value::Timestamp {
                    time: time_b,
                    increment: inc_b,
                },
            ) => time_a == time_b && inc_a == inc_b,
            (
                Value::Binary {
                    subtype: sub_a,
                    bytes: bytes_a,
                },
                Value::Binary {
                    subtype: sub_b,
                    bytes: bytes_b,
                },
            ) => sub_a == sub_b && bytes_a == bytes_b,
            (
                Value::Regex {
                    pattern: pat_a,
                    options: opt_a,
                },
                Value::Regex {
                    pattern: pat_b,
                    options: opt_b,
                },
            ) => pat_a == pat_b && opt_a == opt_b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            (Value::MinKey, Value::MinKey) => true,
            (Value::MaxKey, Value::MaxKey) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Missing => "missing_value".hash(state),
            Value::Null => "null_value".hash(state),
            Value::Undefined => "undefined_value".hash(state),
            Value::Bool(b) => b.hash(state),
            // numbers hash through their normalized form so that equal
            // numbers of different widths hash alike
            value @ (Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal128(_)) => match value.as_i64() {
                Some(n) => n.hash(state),
                None => {
                    let double = value.as_f64().unwrap_or(f64::NAN);
                    let double = if double == -0.0 { 0.0 } else { double };
                    if double.is_nan() {
                        f64::NAN.to_bits().hash(state)
                    } else {
                        double.to_bits().hash(state)
                    }
                }
            },
            Value::String(s) => s.hash(state),
            Value::ObjectId(id) => id.hash(state),
            Value::Date(instant) => instant.hash(state),
            Value::Timestamp { time, increment } => {
                time.hash(state);
                increment.hash(state);
            }
            Value::Binary { subtype, bytes } => {
                subtype.hash(state);
                bytes.hash(state);
            }
            Value::Regex { pattern, options } => {
                pattern.hash(state);
                options.hash(state);
            }
            Value::Array(items) => items.hash(state),
            Value::Document(doc) => doc.hash(state),
            Value::MinKey => "min_key".hash(state),
            Value::MaxKey => "max_key".hash(state),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Missing => write!(f, "missing"),
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", d),
            Value::Decimal128(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Value::Date(instant) => write!(f, "ISODate(\"{}\")", instant.to_rfc3339()),
            Value::Timestamp { time, increment } => {
                write!(f, "Timestamp({}, {})", time, increment)
            }
            Value::Binary { subtype, bytes } => {
                write!(f, "BinData({}, {} bytes)", subtype, bytes.len())
            }
            Value::Regex { pattern, options } => write!(f, "/{}/{}", pattern, options),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Document(doc) => write!(f, "{}", doc),
            Value::MinKey => write!(f, "MinKey"),
            Value::MaxKey => write!(f, "MaxKey"),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int64(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int64(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Decimal128> for Value {
    fn from(value: Decimal128) -> Self {
        Value::Decimal128(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}
