use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead and its jobs are cancelled.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings each client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Default maximum message size in bytes (16 MiB).
///
/// Must fit one chunk plus its header, and a base64-encoded chunk when a
/// client falls back to JSON uploads.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// WebSocket event identifier.
///
/// Event names match the original client protocol, so replies use the same
/// type as the request they answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Session
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,

    // Uploads (client -> server)
    #[serde(rename = "requestUpload")]
    RequestUpload,
    #[serde(rename = "startUpload")]
    StartUpload,
    #[serde(rename = "upload")]
    Upload,

    // Downloads
    #[serde(rename = "startDownload")]
    StartDownload,
    #[serde(rename = "downloadAck")]
    DownloadAck,
    /// Server push carrying a chunk (binary) or a read failure (text).
    #[serde(rename = "download")]
    Download,

    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown event names deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::RequestUpload => "requestUpload",
            Self::StartUpload => "startUpload",
            Self::Upload => "upload",
            Self::StartDownload => "startDownload",
            Self::DownloadAck => "downloadAck",
            Self::Download => "download",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome carried by every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

/// Common WebSocket error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_UNAUTHORIZED: i32 = 401;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
pub const WS_ERR_CODE_TIMEOUT: i32 = 408;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_GONE: i32 = 410;
pub const WS_ERR_CODE_TOO_LARGE: i32 = 413;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::StartUpload).unwrap(),
            "\"startUpload\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::DownloadAck).unwrap(),
            "\"downloadAck\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::Download).unwrap(),
            "\"download\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"startDownload\"").unwrap();
        assert_eq!(mt, MessageType::StartDownload);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"sendMessage\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }

    #[test]
    fn as_str_matches_serde_name() {
        for mt in [
            MessageType::Hello,
            MessageType::RequestUpload,
            MessageType::StartUpload,
            MessageType::Upload,
            MessageType::StartDownload,
            MessageType::DownloadAck,
            MessageType::Download,
        ] {
            let json = serde_json::to_string(&mt).unwrap();
            assert_eq!(json, format!("\"{}\"", mt.as_str()));
        }
    }

    #[test]
    fn status_is_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&Status::Fail).unwrap(), "\"fail\"");
    }
}
