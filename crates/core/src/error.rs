//! Error taxonomy shared by the HTTP layer and the reconciler.

/// Every failure a reconciliation can end in. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DroverError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("connection_failure: {0}")]
    ConnectionFailure(String),
    /// Any other non-2xx answer.
    #[error("server_error: HTTP {status}: {message}")]
    ServerError { status: u16, message: String },
    /// Body was not JSON, or not the shape the endpoint promises.
    #[error("malformed_response: {0}")]
    MalformedResponse(String),
    #[error("role_not_found: role '{role}' does not exist in project '{project}'")]
    RoleNotFound { project: String, role: String },
    #[error("already_exists: {kind} '{id}' already exists")]
    AlreadyExists { kind: String, id: String },
    #[error("unsupported: {0} is not implemented")]
    Unsupported(String),
    #[error("invalid_input: {0}")]
    InvalidInput(String),
}

pub type DroverResult<T> = Result<T, DroverError>;

impl DroverError {
    /// Stable machine-readable name for structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            DroverError::Unauthorized(_) => "unauthorized",
            DroverError::Forbidden(_) => "forbidden",
            DroverError::NotFound(_) => "not_found",
            DroverError::Conflict(_) => "conflict",
            DroverError::Timeout(_) => "timeout",
            DroverError::ConnectionFailure(_) => "connection_failure",
            DroverError::ServerError { .. } => "server_error",
            DroverError::MalformedResponse(_) => "malformed_response",
            DroverError::RoleNotFound { .. } => "role_not_found",
            DroverError::AlreadyExists { .. } => "already_exists",
            DroverError::Unsupported(_) => "unsupported",
            DroverError::InvalidInput(_) => "invalid_input",
        }
    }

    /// Map a non-success HTTP status plus a human message onto the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => DroverError::Unauthorized(message),
            403 => DroverError::Forbidden(message),
            404 => DroverError::NotFound(message),
            409 => DroverError::Conflict(message),
            _ => DroverError::ServerError { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, DroverError::NotFound(_)) }
}
