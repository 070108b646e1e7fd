//! Binary frame protocol: 4-byte big-endian header length + JSON header + raw payload.
//!
//! Chunk bytes travel in binary frames in both directions: `upload` frames
//! from the client and `download` pushes from the server.

use serde::{Deserialize, Serialize};

use crate::constants::Status;

/// Header for a binary upload chunk (client -> server).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFrameHeader {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub upload_id: u64,
}

impl UploadFrameHeader {
    pub fn new(id: impl Into<String>, upload_id: u64) -> Self {
        Self {
            id: id.into(),
            msg_type: FRAME_TYPE_UPLOAD.into(),
            upload_id,
        }
    }
}

/// Header for a binary download chunk (server -> client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFrameHeader {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub status: Status,
    pub download_id: u64,
    pub send_id: u64,
    /// Total content size.
    pub size: u64,
    /// Byte offset of this chunk within the content.
    pub offset: u64,
}

impl DownloadFrameHeader {
    pub fn new(id: impl Into<String>, download_id: u64, send_id: u64, size: u64, offset: u64) -> Self {
        Self {
            id: id.into(),
            msg_type: FRAME_TYPE_DOWNLOAD.into(),
            status: Status::Success,
            download_id,
            send_id,
            size,
            offset,
        }
    }
}

/// `type` value of upload frames.
pub const FRAME_TYPE_UPLOAD: &str = "upload";
/// `type` value of download frames.
pub const FRAME_TYPE_DOWNLOAD: &str = "download";

/// Parsed binary frame.
#[derive(Debug)]
pub enum BinaryMessage {
    Upload {
        header: UploadFrameHeader,
        data: Vec<u8>,
    },
    Download {
        header: DownloadFrameHeader,
        data: Vec<u8>,
    },
}

/// Parses a raw binary WebSocket frame into a [`BinaryMessage`].
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_binary_message(data: &[u8]) -> Result<BinaryMessage, ParseError> {
    if data.len() < 4 {
        return Err(ParseError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() - 4 < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header_bytes = &data[4..4 + header_len];
    let payload = data[4 + header_len..].to_vec();

    // Peek at the JSON to determine type.
    let peek: HeaderPeek =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    match peek.msg_type.as_deref() {
        Some(FRAME_TYPE_UPLOAD) => {
            let header: UploadFrameHeader = serde_json::from_slice(header_bytes)
                .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
            Ok(BinaryMessage::Upload {
                header,
                data: payload,
            })
        }
        Some(FRAME_TYPE_DOWNLOAD) => {
            let header: DownloadFrameHeader = serde_json::from_slice(header_bytes)
                .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
            Ok(BinaryMessage::Download {
                header,
                data: payload,
            })
        }
        other => Err(ParseError::UnknownType(other.unwrap_or_default().to_string())),
    }
}

/// Encodes a binary frame for sending over WebSocket.
pub fn encode_binary_message<T: Serialize>(
    header: &T,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[derive(Deserialize)]
struct HeaderPeek {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),

    #[error("unknown frame type: {0:?}")]
    UnknownType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_binary_frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
        let len = header.len() as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parse_upload_frame() {
        let header = serde_json::to_vec(&serde_json::json!({
            "id": "msg-1",
            "type": "upload",
            "uploadId": 3
        }))
        .unwrap();
        let payload = b"binary data here";

        let frame = make_binary_frame(&header, payload);
        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::Upload { header, data } => {
                assert_eq!(header.id, "msg-1");
                assert_eq!(header.upload_id, 3);
                assert_eq!(data, payload);
            }
            other => panic!("expected Upload variant, got {other:?}"),
        }
    }

    #[test]
    fn parse_download_frame() {
        let header = DownloadFrameHeader::new("push-1", 5, 77, 1024, 512);
        let frame = encode_binary_message(&header, b"\x89PNG\r\n\x1a\n").unwrap();

        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::Download { header: h, data } => {
                assert_eq!(h, header);
                assert_eq!(h.status, Status::Success);
                assert_eq!(data, b"\x89PNG\r\n\x1a\n");
            }
            other => panic!("expected Download variant, got {other:?}"),
        }
    }

    #[test]
    fn parse_too_short() {
        let result = parse_binary_message(&[0, 0, 0]);
        assert!(matches!(result, Err(ParseError::TooShort)));
    }

    #[test]
    fn parse_header_truncated() {
        // Header says 100 bytes but only has 5.
        let data = [0, 0, 0, 100, 1, 2, 3, 4, 5];
        let result = parse_binary_message(&data);
        assert!(matches!(
            result,
            Err(ParseError::HeaderTruncated {
                expected: 100,
                got: 5
            })
        ));
    }

    #[test]
    fn parse_invalid_json() {
        let frame = make_binary_frame(b"not json", b"payload");
        let result = parse_binary_message(&frame);
        assert!(matches!(result, Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn parse_unknown_type() {
        let frame = make_binary_frame(br#"{"type":"artwork_image"}"#, b"x");
        let result = parse_binary_message(&frame);
        assert!(matches!(result, Err(ParseError::UnknownType(t)) if t == "artwork_image"));
    }

    #[test]
    fn upload_frame_without_id_defaults_empty() {
        let frame = make_binary_frame(br#"{"type":"upload","uploadId":1}"#, &[]);
        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::Upload { header, data } => {
                assert!(header.id.is_empty());
                assert!(data.is_empty());
            }
            other => panic!("expected Upload, got {other:?}"),
        }
    }
}
