//! Thread entries and the JSON records exchanged with the chat server.
//!
//! Wire names are camelCase: `{ "messageId", "contents", "messageStop" }`
//! inbound and `{ "message", "messageId" }` outbound.

use serde::{Deserialize, Serialize};

/// Generate a fresh message identifier (UUID v4).
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Who authored a thread entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in the displayed thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    pub message_id: String,
    pub sender: Sender,
    pub contents: String,
    pub is_complete: bool,
}

impl DisplayMessage {
    /// A user message: complete as soon as it exists.
    pub fn user(message_id: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sender: Sender::User,
            contents: contents.into(),
            is_complete: true,
        }
    }

    /// An empty, incomplete assistant placeholder awaiting fragments.
    pub fn assistant_placeholder(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sender: Sender::Assistant,
            contents: String::new(),
            is_complete: false,
        }
    }

    /// True for an assistant reply that has not produced any text yet and is
    /// still open. Front ends show a typing indicator for this state.
    pub fn is_pending(&self) -> bool {
        self.sender == Sender::Assistant && !self.is_complete && self.contents.is_empty()
    }
}

/// A streamed fragment of an assistant reply, as decoded from the socket.
///
/// Every field is optional on the wire; absent `contents` is treated as the
/// empty string and absent `messageStop` as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_stop: Option<bool>,
}

impl InboundFragment {
    pub fn new(message_id: impl Into<String>, contents: impl Into<String>, stop: bool) -> Self {
        Self {
            message_id: Some(message_id.into()),
            contents: Some(contents.into()),
            message_stop: Some(stop),
        }
    }

    /// The identifier, or `None` when it is missing or empty.
    pub fn id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn text(&self) -> &str {
        self.contents.as_deref().unwrap_or("")
    }

    pub fn is_stop(&self) -> bool {
        self.message_stop.unwrap_or(false)
    }
}

/// A user prompt sent to the server. `message_id` is the id the server must
/// echo on every fragment of its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub message: String,
    pub message_id: String,
}
