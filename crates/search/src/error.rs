//! Error types for the search engine.
//!
//! Errors are split by who has to act on them: configuration errors are the
//! client's fault and are never retried, cursor errors tell the client to start
//! the query over (and distinguish tampering from expiry from corruption),
//! tenant errors are authorization failures, and backend errors are propagated
//! from the storage collaborator unchanged.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::tenant::TenantId;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Query construction errors
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Continuation cursor errors
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Tenant isolation errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Storage collaborator errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Failures inside the engine itself.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Returns the HTTP status code the boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Configuration(_) => 400,
            EngineError::Cursor(CursorError::Expired { .. }) => 410,
            EngineError::Cursor(_) => 400,
            EngineError::Tenant(TenantError::UnknownTenant { .. }) => 404,
            EngineError::Tenant(_) => 403,
            EngineError::Backend(_) | EngineError::Internal { .. } => 500,
        }
    }

    /// Returns `true` if the error was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Errors raised while building an expression from query primitives.
///
/// These are non-retryable: the same input always produces the same error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A reference literal was not of the form `Type/id`.
    #[error("invalid reference '{reference}': expected Type/id")]
    InvalidReference { reference: String },

    /// The resource type is not configured for the tenant.
    #[error("unknown resource type: {resource_type}")]
    UnknownResourceType { resource_type: String },

    /// No index is configured at the given search path.
    #[error("no index configured for {resource}.{path}")]
    UnknownSearchPath { resource: String, path: String },

    /// No search parameter with this name exists for the resource type.
    #[error("unknown search parameter '{parameter}' for {resource_type}")]
    UnknownParameter {
        resource_type: String,
        parameter: String,
    },

    /// The index at a path has a different type than the expression requires.
    #[error("index {resource}.{path} is {actual}, expected {expected}")]
    IndexTypeMismatch {
        resource: String,
        path: String,
        expected: String,
        actual: String,
    },

    /// The modifier is not supported for the parameter.
    #[error("unsupported modifier '{modifier}' on parameter '{parameter}'")]
    UnsupportedModifier { parameter: String, modifier: String },

    /// The comparison operator is not supported for the parameter type.
    #[error("unsupported operator '{operator}' for {param_type} parameters")]
    UnsupportedOperator {
        operator: String,
        param_type: String,
    },

    /// A value could not be parsed for its parameter type.
    #[error("invalid value '{value}' for {param_type}: {message}")]
    InvalidValue {
        value: String,
        param_type: String,
        message: String,
    },

    /// The query nests deeper than a continuation cursor can carry.
    #[error("query nests {depth} levels deep, at most {max} are allowed")]
    ExpressionTooDeep { depth: usize, max: usize },

    /// The paging configuration failed validation.
    #[error("invalid paging configuration: {}", .errors.join("; "))]
    InvalidPagingConfig { errors: Vec<String> },

    /// The index configuration document itself is malformed.
    #[error("invalid index configuration: {message}")]
    InvalidIndexConfig { message: String },

    /// The cursor key is not 32 bytes of hex or base64.
    #[error("invalid cursor key: {message}")]
    InvalidCursorKey { message: String },
}

/// Errors raised while resolving a continuation cursor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CursorError {
    /// The cursor decrypted but its payload could not be decoded.
    #[error("unreadable cursor at offset {offset}: {message}")]
    Unreadable { offset: usize, message: String },

    /// The cursor was not issued by this server (wrong key, tampered, or wrong tenant).
    #[error("invalid link")]
    InvalidLink,

    /// The paging state behind the cursor has expired.
    #[error("link expired: paging state {uuid} is no longer available")]
    Expired { uuid: String },
}

/// Errors related to tenant isolation.
#[derive(Error, Debug)]
pub enum TenantError {
    /// Operation not permitted for tenant.
    #[error("operation {operation} on {resource_type} not permitted for tenant {tenant_id}")]
    OperationNotPermitted {
        tenant_id: TenantId,
        operation: String,
        resource_type: String,
    },

    /// No index configuration is registered for the tenant.
    #[error("unknown tenant: {tenant_id}")]
    UnknownTenant { tenant_id: TenantId },
}

/// Errors originating from the storage collaborator.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for cursor decoding.
pub type CursorResult<T> = Result<T, CursorError>;

impl From<serde_json::Error> for ConfigurationError {
    fn from(err: serde_json::Error) -> Self {
        ConfigurationError::InvalidIndexConfig {
            message: err.to_string(),
        }
    }
}
