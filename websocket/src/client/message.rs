use super::error::Error;
use ferrite_core::channel::Sender;
use std::sync::Arc;

/// The enum containing a client-side WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Connection has Opened
    Open,
    /// Connection has Closed
    Close,
}

impl From<Vec<u8>> for Message {
    fn from(vec: Vec<u8>) -> Self {
        Message::Binary(vec)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        match self {
            Message::Text(string) => string.as_ref(),
            Message::Binary(vec) => vec.as_ref(),
            _ => {
                panic!(
                    "WebSocket - AsRef<[u8]> for Message: unsupported message type: {:?}",
                    self
                );
            }
        }
    }
}

/// Optional completion channel attached to a dispatched message,
/// resolved once the message reaches the underlying socket.
pub type Ack = Option<Sender<Result<Arc<()>, Arc<Error>>>>;
