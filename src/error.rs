//! Error types for the Kong provider.

use thiserror::Error;

use crate::kong::KongError;

/// Errors surfaced by provider operations.
///
/// Protocol handlers turn these into error diagnostics; request decoding
/// failures become gRPC statuses via the `From<ProviderError>` conversion.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested remote object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Configuration or state failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider block could not be resolved.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The resource or data source type is not served by this provider.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// State or config JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The gRPC server failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Kong refused a create because the entity already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Kong rejected the credentials.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Kong rate limited the request.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The Admin API is unreachable or failing.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The operation cannot run in the current provider state.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Kong rejected the request body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// The message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::FailedPrecondition(msg)
            | Self::InvalidRequest(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
        }
    }

    /// Whether the error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<KongError> for ProviderError {
    fn from(err: KongError) -> Self {
        let message = err.to_string();
        match &err {
            KongError::Api { status, .. } => match *status {
                400 | 405 | 422 => Self::InvalidRequest(message),
                401 | 403 => Self::PermissionDenied(message),
                404 => Self::NotFound(message),
                409 => Self::AlreadyExists(message),
                429 => Self::ResourceExhausted(message),
                500..=599 => Self::Unavailable(message),
                _ => Self::FailedPrecondition(message),
            }
            KongError::Transport(_) => Self::Unavailable(message),
            KongError::Decode(_) => Self::InvalidRequest(message),
            KongError::InvalidConfig(_) => Self::Configuration(message),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            }
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            }
            ProviderError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}
