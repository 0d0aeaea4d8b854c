use thiserror::Error;

/// Errors that abort council startup or shutdown. Everything that can
/// fail *during* a discussion (backend calls, mirror writes, cursor
/// reads) is handled locally by the task that hit it.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] conclave_core::CouncilError),

    #[error("session setup failed: {0}")]
    Session(#[from] std::io::Error),

    #[error(transparent)]
    Transcript(#[from] conclave_transcript::TranscriptError),

    #[error("backend setup failed: {0}")]
    Backend(#[from] conclave_backend::BackendError),

    #[error("host process failed: {0}")]
    Host(String),
}
