use thiserror::Error;

/// Every way a single chat call can fail. Each failure is terminal for that call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("No data in response body")]
    NoData,
    /// The remote reported an error. `status` is `None` when the failure was
    /// detected before a response arrived.
    #[error("API error: {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Error::Api { .. })
    }

    /// The remote's error message, passed through verbatim.
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Error::Api { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
