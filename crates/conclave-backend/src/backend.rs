use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role a transcript record maps to when handed to a chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the history sent to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request to a chat backend. The history is the full council transcript
/// mapped to roles, in append order.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub turns: Vec<ChatTurn>,
    pub max_tokens: u32,
}

/// Completion returned by a backend.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// The one capability a participant needs: complete a message history.
///
/// Implementations must be `Send + Sync` — a backend handle is shared
/// with the reactor task that drives it. Everything downstream of the
/// reactor is testable against [`MockBackend`](crate::mock::MockBackend).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    /// Send the history, wait for the full completion.
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The call succeeded but produced no usable text.
    #[error("backend returned an empty completion")]
    Empty,

    /// Applied by the caller's deadline around `complete`.
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },
}
