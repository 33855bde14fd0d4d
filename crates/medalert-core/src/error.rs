use medalert_api::ApiError;
use medalert_store::StoreError;
use thiserror::Error;

/// All the ways things can go wrong in MedAlert
#[derive(Error, Debug)]
pub enum Error {
    #[error("API request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Worth trying again later, e.g. the backend was briefly unreachable
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Api(e) => e.is_transient(),
            Error::Storage(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let unavailable = Error::Api(ApiError::RequestFailed {
            status: 503,
            body: String::new(),
        });
        assert!(unavailable.is_transient());
        assert!(Error::Api(ApiError::RateLimitExceeded).is_transient());
        assert!(Error::Storage(StoreError::Io(std::io::Error::other("locked"))).is_transient());

        assert!(!Error::Api(ApiError::Unauthorized).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
    }
}
