use thiserror::Error;

/// Request-level authorization failures. All are recoverable: the handler turns
/// them into a response and the server keeps serving.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("A tenant must be selected for this request")]
    TenantRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Also used when the real cause is a tenant mismatch, so that existence in
    /// another tenant is never disclosed.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AuthzError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        AuthzError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AuthzError::NotFound(message.into())
    }
}
