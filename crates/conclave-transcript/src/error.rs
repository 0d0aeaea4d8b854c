use thiserror::Error;

use crate::codec::CodecError;

/// Errors from the transcript store and tailing cursor.
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// Underlying write, flush, or read failed. Fatal for the single
    /// writer; retried on the next tick for cursors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded for appending.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
