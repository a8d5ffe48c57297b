//! Error types for the tzindex core library.

/// Top-level error enum for the tzindex core library.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unknown type constructor: {0}")]
    UnknownTypeConstructor(String),

    #[error("Invalid arity for {prim}: expected {expected}, found {found}")]
    InvalidArity {
        prim: String,
        expected: String,
        found: usize,
    },

    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Tree is already settled")]
    AlreadySettled,

    #[error("Tree is not settled")]
    NotSettled,

    #[error("Unknown entrypoint: {0}")]
    UnknownEntrypoint(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Maximum nesting depth {0} exceeded")]
    DepthExceeded(usize),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        EngineError::MalformedInput(message.into())
    }

    pub(crate) fn mismatch(
        path: impl ToString,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        EngineError::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
