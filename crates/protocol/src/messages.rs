use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session payloads
// ---------------------------------------------------------------------------

/// Opens a session on a fresh connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRequest {
    #[serde(default)]
    pub token: String,
}

/// Server's answer to `hello`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponse {
    pub connection_id: u64,
}

// ---------------------------------------------------------------------------
// Upload payloads
// ---------------------------------------------------------------------------

/// Reserves an upload slot for a content category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestUploadRequest {
    #[serde(rename = "type")]
    pub category: String,
}

/// Reserved upload slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUploadResponse {
    pub upload_id: u64,
}

/// Confirms a reserved slot with the content's size and extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    pub upload_id: u64,
    pub size: u64,
    pub extension: String,
}

/// Upload accepted; the client may now send chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub upload_id: u64,
    pub content_name: String,
}

/// Sends a chunk of upload data over a text frame.
///
/// The `buffer` field is base64-encoded in JSON. Binary frames carry the
/// same chunk without the encoding overhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub upload_id: u64,
    #[serde(with = "base64_bytes", alias = "buf")]
    pub buffer: Vec<u8>,
}

/// Bytes confirmed so far for an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_id: u64,
    pub ack: u64,
}

/// Identifies an upload in a failure reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub upload_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

// ---------------------------------------------------------------------------
// Download payloads
// ---------------------------------------------------------------------------

/// Requests a stored content by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDownloadRequest {
    pub content_name: String,
    #[serde(rename = "type")]
    pub category: String,
    /// Client-chosen correlation id echoed on every chunk.
    pub send_id: u64,
}

/// Download accepted; chunks follow as binary `download` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDownloadResponse {
    pub download_id: u64,
    pub send_id: u64,
    pub size: u64,
}

/// Reports how many bytes the client has consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAckRequest {
    pub download_id: u64,
    pub ack: u64,
}

/// Identifies a download in a failure push or reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFailure {
    pub download_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<u64>,
}

/// Custom base64 serde module for byte buffers carried in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
