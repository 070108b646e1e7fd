//! Per-connection authorization.

use std::collections::HashSet;
use std::sync::Mutex;

use pigeon_content::ConnectionId;
use pigeon_protocol::constants::{WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_UNAUTHORIZED};
use pigeon_protocol::envelope::Message;

/// Why a content event was refused before reaching the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("authorization failed")]
    Unauthorized,

    #[error("no argument")]
    MissingPayload,
}

impl SessionError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Unauthorized => WS_ERR_CODE_UNAUTHORIZED,
            Self::MissingPayload => WS_ERR_CODE_BAD_REQUEST,
        }
    }
}

/// Connections that completed `hello`.
///
/// With no access token configured every connection is trusted and `hello`
/// is optional.
pub struct SessionTable {
    token: Option<String>,
    authorized: Mutex<HashSet<ConnectionId>>,
}

impl SessionTable {
    pub fn new(access_token: &str) -> Self {
        Self {
            token: (!access_token.is_empty()).then(|| access_token.to_string()),
            authorized: Mutex::new(HashSet::new()),
        }
    }

    /// Handles a `hello` token. Returns whether the connection is now authorized.
    pub fn hello(&self, connection: ConnectionId, token: &str) -> bool {
        let accepted = match &self.token {
            Some(expected) => validate_token(token, expected),
            None => true,
        };
        if accepted {
            self.lock().insert(connection);
        }
        accepted
    }

    pub fn is_authorized(&self, connection: ConnectionId) -> bool {
        self.token.is_none() || self.lock().contains(&connection)
    }

    /// Gate for content events.
    pub fn authorize(
        &self,
        connection: ConnectionId,
        msg: &Message,
        requires_payload: bool,
    ) -> Result<(), SessionError> {
        if !self.is_authorized(connection) {
            tracing::warn!(connection, event = msg.msg_type.as_str(), "unauthorized event");
            return Err(SessionError::Unauthorized);
        }
        if requires_payload && !msg.has_payload() {
            return Err(SessionError::MissingPayload);
        }
        Ok(())
    }

    /// Forgets a closed connection.
    pub fn remove(&self, connection: ConnectionId) {
        self.lock().remove(&connection);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<ConnectionId>> {
        // The set stays consistent even if a holder panicked.
        self.authorized
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Compares tokens in constant time.
fn validate_token(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}
