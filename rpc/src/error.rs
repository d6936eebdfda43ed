//!
//! Common error definitions shared by the RPC connection, the typed
//! proxies and the dispatch machinery. Errors are value types carrying
//! `{code, message, data}`; they do not unwind past the dispatch loop.
//!

use crate::value::Variant;
use thiserror::Error;

/// Failure taxonomy. Every kind maps to a numeric wire code; errors
/// received from the peer keep the peer's code in [`ErrorKind::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller omitted a non-optional argument or passed too many.
    BadArity,
    /// Argument or result value does not match the declared type.
    BadCast,
    /// Handle not registered on this connection.
    UnknownApi,
    /// Operation not present in the interface descriptor.
    UnknownMethod,
    /// Callback id not registered (local only, frame is dropped).
    UnknownCallback,
    /// Malformed JSON, or the nesting depth cap was hit during decode.
    ParseError,
    /// Value-level pack/unpack exceeded the depth bound.
    DepthExceeded,
    /// Transport closed with the call in flight, or send refused.
    ConnectionClosed,
    /// Transport-layer failure (connect, handshake).
    Transport,
    /// The peer returned an error response with this code.
    Remote(i64),
}

impl ErrorKind {
    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::BadArity => -32602,
            ErrorKind::BadCast => -32002,
            ErrorKind::UnknownApi => -32001,
            ErrorKind::UnknownMethod => -32601,
            ErrorKind::UnknownCallback => -32005,
            ErrorKind::ParseError => -32700,
            ErrorKind::DepthExceeded => -32003,
            ErrorKind::ConnectionClosed => -32004,
            ErrorKind::Transport => -32006,
            ErrorKind::Remote(code) => *code,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    data: Option<Variant>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> RpcError {
        RpcError {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(kind: ErrorKind, message: impl Into<String>, data: Variant) -> RpcError {
        RpcError {
            kind,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Variant> {
        self.data.as_ref()
    }

    pub fn bad_arity(op: &str, given: usize, required: usize, total: usize) -> RpcError {
        RpcError::new(
            ErrorKind::BadArity,
            format!("operation `{op}` takes {required}..={total} arguments, {given} given"),
        )
    }

    pub fn bad_cast(detail: impl Into<String>) -> RpcError {
        RpcError::new(ErrorKind::BadCast, detail)
    }

    pub fn bad_argument(index: usize, detail: &str) -> RpcError {
        RpcError::new(ErrorKind::BadCast, format!("argument {index}: {detail}"))
    }

    pub fn unknown_api(handle: u32) -> RpcError {
        RpcError::new(ErrorKind::UnknownApi, format!("unknown api handle {handle}"))
    }

    pub fn unknown_method(method: &str) -> RpcError {
        RpcError::new(ErrorKind::UnknownMethod, format!("unknown method `{method}`"))
    }

    pub fn unknown_callback(id: u64) -> RpcError {
        RpcError::new(
            ErrorKind::UnknownCallback,
            format!("unknown callback id {id}"),
        )
    }

    pub fn parse_error(detail: impl Into<String>) -> RpcError {
        RpcError::new(ErrorKind::ParseError, detail)
    }

    pub fn depth_exceeded() -> RpcError {
        RpcError::new(ErrorKind::DepthExceeded, "maximum nesting depth exceeded")
    }

    pub fn connection_closed() -> RpcError {
        RpcError::new(ErrorKind::ConnectionClosed, "connection is closed")
    }

    pub fn transport(detail: impl Into<String>) -> RpcError {
        RpcError::new(ErrorKind::Transport, detail)
    }

    pub fn remote(code: i64, message: impl Into<String>, data: Option<Variant>) -> RpcError {
        RpcError {
            kind: ErrorKind::Remote(code),
            message: message.into(),
            data,
        }
    }
}
