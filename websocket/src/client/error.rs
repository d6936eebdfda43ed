use ferrite_core::channel::{RecvError, SendError, TrySendError};
use std::sync::PoisonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("PoisonError")]
    PoisonError,

    #[error("Invalid message type")]
    InvalidMessageType,

    #[error("Invalid WebSocket URL scheme: {0}")]
    AddressSchema(String),

    #[error("Invalid handshake header: {0}")]
    InvalidHeader(String),

    #[error("WebSocket is already connected")]
    AlreadyConnected,

    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("Dispatch channel ack error")]
    DispatchChannelAck,

    #[error("Dispatch channel send error")]
    DispatchChannelSend,

    #[error("Dispatch channel try_send error")]
    DispatchChannelTrySend,

    #[error("Receive channel error")]
    ReceiveChannel,

    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Error {
        Error::PoisonError
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(_error: SendError<T>) -> Error {
        Error::DispatchChannelSend
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(_error: TrySendError<T>) -> Error {
        Error::DispatchChannelTrySend
    }
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Error {
        Error::ReceiveChannel
    }
}
