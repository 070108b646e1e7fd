//! Wire protocol for Pigeon content transfer.
//!
//! Text frames carry a JSON [`Message`] envelope; chunk bytes travel in
//! binary frames (see [`binary`]).

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use binary::{
    BinaryMessage, DownloadFrameHeader, ParseError, UploadFrameHeader, encode_binary_message,
    parse_binary_message,
};
pub use constants::{MessageType, Status};
pub use envelope::{Message, WsError};
