//! Error taxonomy shared across the server.
//!
//! Every component returns typed errors from this taxonomy; the API layer is
//! the only place where they are mapped to HTTP statuses. Errors that occur
//! after the authoritative write has committed (cache update, event publish,
//! invalidation broadcast) are logged by the caller and never surfaced.

use thiserror::Error;

/// Server-wide error taxonomy.
#[derive(Error, Debug)]
pub enum TitanError {
    /// Path identifier is not valid unpadded Base64URL
    #[error("invalid Base64URL identifier encoding: {0}")]
    InvalidIdentifierEncoding(String),

    /// Document failed structural validation or canonicalization
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Entity does not exist
    #[error("{entity} not found: {identifier}")]
    NotFound {
        /// Entity class name as used in error bodies
        entity: &'static str,
        /// The raw (decoded) identifier
        identifier: String,
    },

    /// Entity with the same identifier already exists
    #[error("{entity} already exists: {identifier}")]
    AlreadyExists {
        entity: &'static str,
        identifier: String,
    },

    /// `If-Match` did not match the current ETag
    #[error("precondition failed: ETag mismatch")]
    PreconditionFailed,

    /// No SubmodelElement at the given idShortPath
    #[error("submodel element not found at path: {path}")]
    ElementNotFound { path: String },

    /// A SubmodelElement with the same idShort already exists in the container
    #[error("submodel element already exists at path: {path}")]
    ElementAlreadyExists { path: String },

    /// idShortPath is malformed or does not address a container
    #[error("invalid idShortPath: {path} ({reason})")]
    InvalidPath { path: String, reason: String },

    /// Authoritative store unreachable; the request may be retried
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Event bus buffer is full; the request may be retried
    #[error("event bus saturated")]
    EventBusSaturated,

    /// Missing or invalid credentials (surfaced from external auth)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted (surfaced from external auth)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Anything that should never happen during normal operation
    #[error("internal error: {0}")]
    Internal(String),
}

impl TitanError {
    /// Stable machine-readable code, used as `code` in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TitanError::InvalidIdentifierEncoding(_) => "InvalidIdentifierEncoding",
            TitanError::InvalidDocument(_) => "InvalidDocument",
            TitanError::NotFound { .. } => "NotFound",
            TitanError::AlreadyExists { .. } => "AlreadyExists",
            TitanError::PreconditionFailed => "PreconditionFailed",
            TitanError::ElementNotFound { .. } => "ElementNotFound",
            TitanError::ElementAlreadyExists { .. } => "ElementAlreadyExists",
            TitanError::InvalidPath { .. } => "InvalidPath",
            TitanError::StoreUnavailable(_) => "StoreUnavailable",
            TitanError::EventBusSaturated => "EventBusSaturated",
            TitanError::Unauthorized(_) => "Unauthorized",
            TitanError::Forbidden(_) => "Forbidden",
            TitanError::Internal(_) => "InternalError",
        }
    }

    /// Whether a client may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TitanError::StoreUnavailable(_) | TitanError::EventBusSaturated
        )
    }

    /// Shorthand for a `NotFound` with an owned identifier.
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        TitanError::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    /// Shorthand for an `AlreadyExists` with an owned identifier.
    pub fn already_exists(entity: &'static str, identifier: impl Into<String>) -> Self {
        TitanError::AlreadyExists {
            entity,
            identifier: identifier.into(),
        }
    }

    /// Shorthand for an `InvalidPath` with a reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TitanError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type used throughout the server.
pub type TitanResult<T> = Result<T, TitanError>;
