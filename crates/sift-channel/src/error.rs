use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed command: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Stable code reported to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Json(_) => "INVALID_JSON",
            Self::Malformed(_) => "MALFORMED_COMMAND",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
