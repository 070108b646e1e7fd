use serde::{Deserialize, Serialize};

use crate::constants::{MessageType, Status};

/// Error details in a WebSocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

/// Envelope for all text WebSocket communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the handler knows which request type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

fn to_raw<T: Serialize>(
    payload: Option<&T>,
) -> Result<Option<Box<serde_json::value::RawValue>>, serde_json::Error> {
    match payload {
        Some(p) => {
            let json = serde_json::to_string(p)?;
            Ok(Some(serde_json::value::RawValue::from_string(json)?))
        }
        None => Ok(None),
    }
}

impl Message {
    /// Creates a new request or push message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            status: None,
            payload: to_raw(payload)?,
            error: None,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if the message carries a non-null payload.
    pub fn has_payload(&self) -> bool {
        self.payload.as_ref().is_some_and(|raw| raw.get() != "null")
    }

    /// Creates a successful message of the given type.
    ///
    /// Used when a reply has to be produced away from the request itself.
    pub fn success<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let mut msg = Message::new(id, msg_type, payload)?;
        msg.status = Some(Status::Success);
        Ok(msg)
    }

    /// Creates a failed message of the given type.
    ///
    /// `payload` lets a failure still identify the job it concerns.
    pub fn failure<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        code: i32,
        message: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            status: Some(Status::Fail),
            payload: to_raw(payload)?,
            error: Some(WsError {
                code,
                message: message.into(),
            }),
        })
    }

    /// Creates a protocol-level error message (unparseable or unknown request).
    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            status: Some(Status::Fail),
            payload: None,
            error: Some(WsError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Creates a successful reply to this request, echoing its id and type.
    pub fn reply<T: Serialize>(&self, payload: Option<&T>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: self.id.clone(),
            msg_type: self.msg_type.clone(),
            status: Some(Status::Success),
            payload: to_raw(payload)?,
            error: None,
        })
    }

    /// Creates a reply of a different type (e.g. `pong` for `ping`).
    pub fn reply_as<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let mut reply = self.reply(payload)?;
        reply.msg_type = msg_type;
        Ok(reply)
    }

    /// Creates a failed reply to this request, echoing its id and type.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: self.msg_type.clone(),
            status: Some(Status::Fail),
            payload: None,
            error: Some(WsError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Creates a failed reply that still carries a payload.
    pub fn reply_failure<T: Serialize>(
        &self,
        code: i32,
        message: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::failure(self.id.clone(), self.msg_type.clone(), code, message, payload)
    }

    /// Returns `true` for replies with `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }
}
