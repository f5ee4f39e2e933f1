//! Wire format of the relay's subscribe stream
//!
//! Every frame on the subscription is a JSON object. Message frames carry the
//! publisher's `title` (its client name) and the `message` body; the relay also
//! interleaves control frames such as `open` and `keepalive`.

use serde::Deserialize;
use thiserror::Error;

/// Event name the relay uses for published messages
pub const MESSAGE_EVENT: &str = "message";

/// A published clipboard message received from the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Client name of the publisher (the `Title` header it sent)
    pub origin_label: String,

    /// Published clipboard text, possibly empty
    pub body: String,
}

impl InboundMessage {
    pub fn new(origin_label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            origin_label: origin_label.into(),
            body: body.into(),
        }
    }
}

/// A decoded subscription frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// A published message
    Message(InboundMessage),

    /// Relay bookkeeping (`open`, `keepalive`, ...) carrying no clipboard data
    Control(String),
}

/// Errors decoding a subscription frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not a JSON object of the expected shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Message frame without a required field
    #[error("message frame is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one text frame from the subscription
///
/// Frames without an `event` field are treated as messages.
pub fn decode_frame(text: &str) -> Result<RelayFrame, DecodeError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    match raw.event.as_deref() {
        Some(event) if event != MESSAGE_EVENT => Ok(RelayFrame::Control(event.to_string())),
        _ => {
            let origin_label = raw.title.ok_or(DecodeError::MissingField("title"))?;
            let body = raw.message.ok_or(DecodeError::MissingField("message"))?;
            Ok(RelayFrame::Message(InboundMessage { origin_label, body }))
        }
    }
}
