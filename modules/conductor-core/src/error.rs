use thiserror::Error;

use vault_client::VaultError;

/// Everything that can go wrong while servicing a router command.
///
/// Handlers translate these into `trainFailed` responses; nothing here is
/// allowed to escape to the bus layer.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("train not found")]
    NotFound,

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("registry move failed for tag {tag}: {message}")]
    MoveFailed { tag: String, message: String },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),
}

impl From<VaultError> for RouterError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound => RouterError::NotFound,
            other => RouterError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for RouterError {
    fn from(err: redis::RedisError) -> Self {
        RouterError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::MalformedMessage(err.to_string())
    }
}
