use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for Dolomite operations.
///
/// Every kind maps onto a stable numeric code via [ErrorKind::code]. The codes
/// are part of the engine contract: they surface verbatim in command responses
/// and must never change for an existing kind. Kinds without an upstream name
/// use the `Location` variant, which carries its code directly.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::errors::{DolomiteError, ErrorKind, DolomiteResult};
///
/// fn example() -> DolomiteResult<()> {
///     Err(DolomiteError::new("cursor id 42 not found", ErrorKind::CursorNotFound))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Validation errors
    /// A supplied value is malformed or out of range
    BadValue,
    /// The command or update document could not be parsed
    FailedToParse,
    /// A value has the wrong type for the requested operation
    TypeMismatch,
    /// The operation is not valid in the current context
    IllegalOperation,
    /// A replacement document carries a `$`-prefixed field name
    DollarPrefixedFieldName,
    /// Invalid options were supplied to a command
    InvalidOptions,
    /// The namespace name is invalid
    InvalidNamespace,

    // Semantic errors
    /// A path cannot be created because it traverses a non-document value
    PathNotViable,
    /// Two update operators touch the same or overlapping paths
    ConflictingUpdateOperators,
    /// An attempt was made to modify the immutable `_id` field
    ImmutableField,

    // Resource errors
    /// The requested cursor does not exist or has been closed
    CursorNotFound,
    /// The operation exceeded its `maxTimeMS` budget
    MaxTimeMSExpired,
    /// The operation was cancelled cooperatively
    QueryCanceled,
    /// The requested index does not exist
    IndexNotFound,

    // Constraint errors
    /// A unique index constraint was violated
    DuplicateKey,

    // Expression errors
    /// An unknown aggregation expression operator was used
    InvalidPipelineOperator,

    // Numbered location errors (e.g. 40353, 15998, 40177). The code is the
    // identity; the message carries the detail.
    Location(i32),

    // Internal errors - used as fallback for unexpected conditions
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Returns the stable numeric code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::BadValue => 2,
            ErrorKind::InternalError => 8,
            ErrorKind::FailedToParse => 9,
            ErrorKind::TypeMismatch => 14,
            ErrorKind::IllegalOperation => 20,
            ErrorKind::IndexNotFound => 27,
            ErrorKind::PathNotViable => 28,
            ErrorKind::ConflictingUpdateOperators => 40,
            ErrorKind::CursorNotFound => 43,
            ErrorKind::MaxTimeMSExpired => 50,
            ErrorKind::DollarPrefixedFieldName => 52,
            ErrorKind::ImmutableField => 66,
            ErrorKind::InvalidOptions => 72,
            ErrorKind::InvalidNamespace => 73,
            ErrorKind::InvalidPipelineOperator => 168,
            ErrorKind::QueryCanceled => 175,
            ErrorKind::DuplicateKey => 11000,
            ErrorKind::Location(code) => *code,
        }
    }

    /// Returns the short name of this kind.
    pub fn name(&self) -> String {
        match self {
            ErrorKind::BadValue => "BadValue".to_string(),
            ErrorKind::InternalError => "InternalError".to_string(),
            ErrorKind::FailedToParse => "FailedToParse".to_string(),
            ErrorKind::TypeMismatch => "TypeMismatch".to_string(),
            ErrorKind::IllegalOperation => "IllegalOperation".to_string(),
            ErrorKind::IndexNotFound => "IndexNotFound".to_string(),
            ErrorKind::PathNotViable => "PathNotViable".to_string(),
            ErrorKind::ConflictingUpdateOperators => "ConflictingUpdateOperators".to_string(),
            ErrorKind::CursorNotFound => "CursorNotFound".to_string(),
            ErrorKind::MaxTimeMSExpired => "MaxTimeMSExpired".to_string(),
            ErrorKind::DollarPrefixedFieldName => "DollarPrefixedFieldName".to_string(),
            ErrorKind::ImmutableField => "ImmutableField".to_string(),
            ErrorKind::InvalidOptions => "InvalidOptions".to_string(),
            ErrorKind::InvalidNamespace => "InvalidNamespace".to_string(),
            ErrorKind::InvalidPipelineOperator => "InvalidPipelineOperator".to_string(),
            ErrorKind::QueryCanceled => "QueryCanceled".to_string(),
            ErrorKind::DuplicateKey => "DuplicateKey".to_string(),
            ErrorKind::Location(code) => format!("Location{}", code),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Custom Dolomite error type.
///
/// `DolomiteError` encapsulates the error message, kind (and therefore numeric
/// code), and an optional cause. It supports error chaining and backtraces for
/// debugging.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::errors::{DolomiteError, ErrorKind};
///
/// let err = DolomiteError::new("divisor cannot be 0", ErrorKind::BadValue);
/// assert_eq!(err.code(), 2);
/// ```
#[derive(Clone)]
pub struct DolomiteError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<DolomiteError>>,
    backtrace: Arc<Backtrace>,
}

impl DolomiteError {
    /// Creates a new `DolomiteError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        DolomiteError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a new `DolomiteError` with a cause error.
    ///
    /// This creates an error chain where the cause error is preserved for
    /// debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: DolomiteError) -> Self {
        DolomiteError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    /// Returns the stable numeric code of this error.
    pub fn code(&self) -> i32 {
        self.error_kind.code()
    }

    pub fn cause(&self) -> Option<&DolomiteError> {
        self.cause.as_deref()
    }
}

impl Display for DolomiteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for DolomiteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print code and message, followed by cause or stack trace
        match &self.cause {
            Some(cause) => write!(
                f,
                "[Error {}] {}\nCaused by: {:?}",
                self.code(),
                self.message,
                cause
            ),
            None => write!(
                f,
                "[Error {}] {}\n{:?}",
                self.code(),
                self.message,
                self.backtrace
            ),
        }
    }
}

impl Error for DolomiteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Dolomite operations.
///
/// `DolomiteResult<T>` is shorthand for `Result<T, DolomiteError>`.
/// All fallible engine operations return this type.
pub type DolomiteResult<T> = Result<T, DolomiteError>;

impl From<std::num::ParseIntError> for DolomiteError {
    fn from(err: std::num::ParseIntError) -> Self {
        DolomiteError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::TypeMismatch,
        )
    }
}

impl From<std::num::ParseFloatError> for DolomiteError {
    fn from(err: std::num::ParseFloatError) -> Self {
        DolomiteError::new(
            &format!("Float parsing error: {}", err),
            ErrorKind::TypeMismatch,
        )
    }
}

impl From<regex::Error> for DolomiteError {
    fn from(err: regex::Error) -> Self {
        DolomiteError::new(&format!("Regular expression is invalid: {}", err), ErrorKind::BadValue)
    }
}
