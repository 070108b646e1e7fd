//! Error taxonomy for content jobs.

use pigeon_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CONFLICT, WS_ERR_CODE_GONE, WS_ERR_CODE_INTERNAL,
    WS_ERR_CODE_NOT_FOUND, WS_ERR_CODE_TIMEOUT, WS_ERR_CODE_TOO_LARGE, WS_ERR_CODE_UNAUTHORIZED,
};

/// Errors produced by content jobs.
///
/// `Display` is what the client sees, so filesystem detail never leaks into
/// it; the wrapped [`std::io::Error`] is only reachable through `source()`.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("invalid input")]
    InvalidInput,

    #[error("invalid id")]
    InvalidId,

    #[error("authorization failed")]
    Unauthorized,

    #[error("invalid type")]
    InvalidCategory,

    #[error("invalid extension")]
    InvalidExtension,

    #[error("size is too big")]
    SizeExceeded,

    #[error("server error")]
    Io(#[from] std::io::Error),

    #[error("content error")]
    ContentUnavailable,

    #[error("server error")]
    DuplicateId,

    #[error("timeout")]
    Timeout,

    #[error("upload closed")]
    UploadClosed,

    #[error("emit startUpload event first")]
    ProtocolOrderViolation,

    #[error("connection closed")]
    Disconnected,
}

impl ContentError {
    /// Wire error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidInput | Self::InvalidCategory | Self::InvalidExtension => {
                WS_ERR_CODE_BAD_REQUEST
            }
            Self::InvalidId | Self::ContentUnavailable => WS_ERR_CODE_NOT_FOUND,
            Self::Unauthorized => WS_ERR_CODE_UNAUTHORIZED,
            Self::SizeExceeded => WS_ERR_CODE_TOO_LARGE,
            Self::Io(_) | Self::DuplicateId => WS_ERR_CODE_INTERNAL,
            Self::Timeout => WS_ERR_CODE_TIMEOUT,
            Self::UploadClosed | Self::ProtocolOrderViolation => WS_ERR_CODE_CONFLICT,
            Self::Disconnected => WS_ERR_CODE_GONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_detail_is_not_displayed() {
        let err = ContentError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/imageContents/abc.png: permission denied",
        ));
        assert_eq!(err.to_string(), "server error");
        assert_eq!(err.code(), 500);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("permission denied"));
    }

    #[test]
    fn client_messages() {
        assert_eq!(ContentError::SizeExceeded.to_string(), "size is too big");
        assert_eq!(ContentError::UploadClosed.to_string(), "upload closed");
        assert_eq!(ContentError::InvalidCategory.to_string(), "invalid type");
        assert_eq!(ContentError::Timeout.code(), 408);
        assert_eq!(ContentError::Unauthorized.code(), 401);
    }
}
