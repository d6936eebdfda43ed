use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Listen(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Server is not listening")]
    NotListening,

    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tungstenite::Error),

    #[error("Connection closed abnormally")]
    AbnormalClose,

    #[error("Unable to signal listener stop: {0}")]
    Stop(String),

    #[error("Unable to join listener: {0}")]
    Join(String),

    #[error("Listener shutdown error: {0}")]
    Done(String),

    #[error("Connection sink error")]
    Sink,

    #[error("{0}")]
    Other(String),
}

impl From<tokio::sync::mpsc::error::SendError<tungstenite::Message>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<tungstenite::Message>) -> Error {
        Error::Sink
    }
}
