use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP failure (status {status}): {body}")]
    HttpFailure { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid gazetteer: {0}")]
    InvalidGazetteer(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl IngestError {
    /// Status code for `HttpFailure`, `None` for every other variant.
    pub fn status(&self) -> Option<u16> {
        match self {
            IngestError::HttpFailure { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::MalformedResponse(err.to_string())
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::InvalidGazetteer(err.to_string())
    }
}
