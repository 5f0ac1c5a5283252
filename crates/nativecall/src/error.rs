//! Error types.

use thiserror::Error;

use crate::types::TypeTag;

/// Errors produced while loading libraries, binding symbols or invoking
/// callables.
///
/// Configuration problems (missing library or symbol, rejected call
/// interface) are always returned as values. Contract violations at call
/// time surface here only through [`Callable::try_invoke`] or the error slot
/// of a managed signature; otherwise they panic.
///
/// [`Callable::try_invoke`]: crate::Callable::try_invoke
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfiError {
    #[error("library '{name}' not found: {reason}")]
    LibraryNotFound { name: String, reason: String },

    #[error("failed to load library '{path}': {reason}")]
    LoadError { path: String, reason: String },

    #[error("symbol '{symbol}' not found in '{library}': {reason}")]
    SymbolNotFound {
        symbol: String,
        library: String,
        reason: String,
    },

    #[error("failed to close library '{path}': {reason}")]
    CloseError { path: String, reason: String },

    #[error("library '{path}' is closed")]
    LibraryClosed { path: String },

    #[error("bad typedef in call interface for '{symbol}'")]
    BadTypedef { symbol: String },

    #[error("bad abi in call interface for '{symbol}'")]
    BadAbi { symbol: String },

    #[error("unsupported type: {tag}")]
    UnsupportedType { tag: TypeTag },

    #[error("void is not a legal parameter type (parameter {position})")]
    IllegalVoidParameter { position: usize },

    #[error(
        "multiple return values are unsupported (except an error as second result), got {count}"
    )]
    MultiReturnUnsupported { count: usize },

    #[error("'{symbol}' returns {native}, which cannot be read as {managed}")]
    ResultMismatch {
        symbol: String,
        native: TypeTag,
        managed: TypeTag,
    },

    #[error("illegal argument length, expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("argument {index}: {source}")]
    Marshal { index: usize, source: MarshalError },

    #[error("return value: {0}")]
    Unmarshal(MarshalError),

    #[error("symbol name '{0}' contains an interior NUL byte")]
    InvalidSymbolName(String),
}

/// Per-value conversion failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("cannot convert a {value} value to {tag}")]
    TypeMismatch { value: TypeTag, tag: TypeTag },

    #[error("string contains an interior NUL byte at offset {0}")]
    InteriorNul(usize),

    #[error("type {0} cannot be marshaled")]
    UnsupportedType(TypeTag),
}

/// Errors loading a [`LoaderConfig`](crate::LoaderConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}
