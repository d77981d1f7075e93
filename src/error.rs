use thiserror::Error;

/// Failure talking to one of the external geodata or routing services
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Service returned status {0}")]
    Status(u16),
    #[error("Service rejected the request: {0}")]
    Rejected(String),
    #[error("Malformed response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Worth another attempt: the same request may succeed a moment later
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout => true,
            SourceError::Status(code) => *code == 429 || *code >= 500,
            SourceError::Rejected(_) | SourceError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}
