//!
//! Wire frame construction and discrimination. Every RPC message is a
//! single JSON object in one WebSocket text frame:
//!
//! - request:  `{"method":"call","params":[handle, op, args], "id":n}`
//! - reverse:  `{"method":"callback","params":[cb_id, args], "id":n}`
//! - notice:   `{"method":"notice","params":[cb_id, args]}`
//! - success:  `{"id":n,"result":value}`
//! - failure:  `{"id":n,"error":{"code":c,"message":m,"data":d}}`
//!
//! Operations are addressed by zero-based ordinal or by name; requests
//! are sent with ordinals.
//!

use crate::connection::{ApiId, CallbackId, RequestId};
use crate::error::RpcError;
use crate::value::{Variant, VariantObject};
use std::fmt;

/// Operation address within an interface descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpRef {
    Index(usize),
    Name(String),
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpRef::Index(index) => write!(f, "#{index}"),
            OpRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for OpRef {
    fn from(index: usize) -> OpRef {
        OpRef::Index(index)
    }
}

impl From<&str> for OpRef {
    fn from(name: &str) -> OpRef {
        OpRef::Name(name.to_string())
    }
}

/// A structurally valid inbound frame.
pub(crate) enum Incoming {
    Call {
        id: RequestId,
        api: ApiId,
        op: OpRef,
        args: Vec<Variant>,
    },
    Callback {
        id: RequestId,
        callback: CallbackId,
        args: Vec<Variant>,
    },
    Notice {
        callback: CallbackId,
        args: Vec<Variant>,
    },
    Response {
        id: RequestId,
        result: Result<Variant, RpcError>,
    },
}

/// A structurally invalid inbound frame; when `id` is present the
/// sender expects an error response.
pub(crate) struct FrameError {
    pub id: Option<RequestId>,
    pub error: RpcError,
}

fn request(method: &str, params: Vec<Variant>, id: Option<RequestId>) -> Variant {
    let mut object = VariantObject::new();
    object.insert("method", Variant::String(method.to_string()));
    object.insert("params", Variant::Array(params));
    if let Some(id) = id {
        object.insert("id", Variant::UInt64(id));
    }
    Variant::Object(object)
}

pub(crate) fn call_frame(id: RequestId, api: ApiId, op: &OpRef, args: Vec<Variant>) -> Variant {
    let op = match op {
        OpRef::Index(index) => Variant::UInt64(*index as u64),
        OpRef::Name(name) => Variant::String(name.clone()),
    };
    request(
        "call",
        vec![Variant::UInt64(api as u64), op, Variant::Array(args)],
        Some(id),
    )
}

pub(crate) fn callback_frame(id: RequestId, callback: CallbackId, args: Vec<Variant>) -> Variant {
    request(
        "callback",
        vec![Variant::UInt64(callback), Variant::Array(args)],
        Some(id),
    )
}

pub(crate) fn notice_frame(callback: CallbackId, args: Vec<Variant>) -> Variant {
    request(
        "notice",
        vec![Variant::UInt64(callback), Variant::Array(args)],
        None,
    )
}

pub(crate) fn result_frame(id: RequestId, result: Variant) -> Variant {
    let mut object = VariantObject::new();
    object.insert("id", Variant::UInt64(id));
    object.insert("result", result);
    Variant::Object(object)
}

pub(crate) fn error_frame(id: RequestId, error: &RpcError) -> Variant {
    let mut payload = VariantObject::new();
    payload.insert("code", Variant::Int64(error.code()));
    payload.insert("message", Variant::String(error.message().to_string()));
    if let Some(data) = error.data() {
        payload.insert("data", data.clone());
    }
    let mut object = VariantObject::new();
    object.insert("id", Variant::UInt64(id));
    object.insert("error", Variant::Object(payload));
    Variant::Object(object)
}

fn malformed(id: Option<RequestId>, detail: &str) -> FrameError {
    FrameError {
        id,
        error: RpcError::parse_error(detail.to_string()),
    }
}

fn take_args(
    params: &mut Vec<Variant>,
    index: usize,
    id: Option<RequestId>,
) -> Result<Vec<Variant>, FrameError> {
    match params.get_mut(index) {
        None => Ok(Vec::new()),
        Some(Variant::Array(args)) => Ok(std::mem::take(args)),
        Some(_) => Err(malformed(id, "arguments must be an array")),
    }
}

pub(crate) fn parse_incoming(value: Variant) -> Result<Incoming, FrameError> {
    let mut object = match value {
        Variant::Object(object) => object,
        _ => return Err(malformed(None, "frame is not an object")),
    };

    let id = object.get("id").and_then(|v| v.as_u64());

    if let Some(method) = object.get("method").and_then(|v| v.as_str()) {
        let method = method.to_string();
        let mut params = match object.remove("params") {
            Some(Variant::Array(params)) => params,
            Some(_) => return Err(malformed(id, "params must be an array")),
            None => return Err(malformed(id, "missing params")),
        };

        match method.as_str() {
            "call" => {
                let id = match id {
                    Some(id) => id,
                    None => return Err(malformed(None, "call without id")),
                };
                let api = params
                    .first()
                    .and_then(|v| v.as_u64())
                    .and_then(|v| ApiId::try_from(v).ok())
                    .ok_or_else(|| malformed(Some(id), "invalid api handle"))?;
                let op = match params.get(1) {
                    Some(Variant::String(name)) => OpRef::Name(name.clone()),
                    Some(value) => match value.as_u64() {
                        Some(index) => OpRef::Index(index as usize),
                        None => return Err(malformed(Some(id), "invalid operation reference")),
                    },
                    None => return Err(malformed(Some(id), "missing operation reference")),
                };
                let args = take_args(&mut params, 2, Some(id))?;
                Ok(Incoming::Call { id, api, op, args })
            }
            "callback" => {
                let id = match id {
                    Some(id) => id,
                    None => return Err(malformed(None, "callback without id")),
                };
                let callback = params
                    .first()
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| malformed(Some(id), "invalid callback id"))?;
                let args = take_args(&mut params, 1, Some(id))?;
                Ok(Incoming::Callback { id, callback, args })
            }
            "notice" => {
                let callback = params
                    .first()
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| malformed(None, "invalid callback id"))?;
                let args = take_args(&mut params, 1, None)?;
                Ok(Incoming::Notice { callback, args })
            }
            other => Err(FrameError {
                id,
                error: RpcError::unknown_method(other),
            }),
        }
    } else if let Some(id) = id {
        if let Some(error) = object.remove("error") {
            let error = match error.as_object() {
                Some(payload) => {
                    let code = payload.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
                    let message = payload
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("remote error")
                        .to_string();
                    let data = payload.get("data").cloned();
                    RpcError::remote(code, message, data)
                }
                None => RpcError::remote(0, "remote error", None),
            };
            Ok(Incoming::Response {
                id,
                result: Err(error),
            })
        } else if let Some(result) = object.remove("result") {
            Ok(Incoming::Response {
                id,
                result: Ok(result),
            })
        } else {
            Err(malformed(Some(id), "response without result or error"))
        }
    } else {
        Err(malformed(None, "frame without method or id"))
    }
}
