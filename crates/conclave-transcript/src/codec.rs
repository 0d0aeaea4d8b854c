//! The only place that knows the on-disk shape of a transcript record:
//! one JSON object per line, `\n`-terminated. Unknown keys survive a
//! decode/encode round trip via `Message::extra`.

use conclave_core::types::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Blank lines are not records.
    #[error("empty transcript line")]
    EmptyLine,

    /// The line is not a complete JSON object with the required fields.
    #[error("malformed transcript record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message as a single line, including the terminating `\n`.
///
/// serde_json escapes interior newlines in `content`, so the result is
/// guaranteed to contain exactly one `\n` — the terminator.
pub fn encode_line(msg: &Message) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one transcript line (with or without its trailing `\n`).
///
/// Requires `id`, `from`, `type`, and `content`; `timestamp` defaults to
/// the decode instant when absent, and unknown keys are kept.
pub fn decode_line(line: &str) -> Result<Message, CodecError> {
    let trimmed = line.trim_end_matches('\n');
    if trimmed.trim().is_empty() {
        return Err(CodecError::EmptyLine);
    }
    Ok(serde_json::from_str(trimmed)?)
}
