use thiserror::Error;

#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CouncilError {
    /// Short error code string for logs and the fatal stderr diagnostic.
    pub fn code(&self) -> &'static str {
        match self {
            CouncilError::Config(_) => "CONFIG_ERROR",
            CouncilError::Io(_) => "IO_ERROR",
            CouncilError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CouncilError>;
