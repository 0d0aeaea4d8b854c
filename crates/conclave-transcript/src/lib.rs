pub mod codec;
pub mod cursor;
pub mod error;
pub mod store;

pub use codec::{decode_line, encode_line, CodecError};
pub use cursor::TailCursor;
pub use error::TranscriptError;
pub use store::{read_transcript, TranscriptWriter, DISCUSSION_FILE};
