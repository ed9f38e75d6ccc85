use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarborError>;

#[derive(Debug, Error)]
pub enum HarborError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl HarborError {
    /// HTTP status of an API-level error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HarborError::Api { status, .. } => Some(*status),
            HarborError::Network(_) => None,
        }
    }
}

impl From<reqwest::Error> for HarborError {
    fn from(err: reqwest::Error) -> Self {
        HarborError::Network(err.to_string())
    }
}
