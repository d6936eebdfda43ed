//!
//! Function-valued arguments. A [`Callback`] wraps a plain closure on
//! the side that declares it; crossing the wire it is replaced by a
//! numeric callback id, and the receiving side reconstructs a
//! [`Callback`] that routes invocations back over the connection.
//!
//! The kind is fixed by the declared signature: `Callback<A>` (no
//! result) travels as a multi-shot "notice" callback, `Callback<A, R>`
//! as a "reply-once" callback that is removed once invoked.
//!

use crate::connection::{ApiConnection, CallbackId};
use crate::error::RpcError;
use crate::json;
use crate::result::RpcResult;
use crate::value::{from_variant, to_variant, Variant};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Type-erased callable stored in a connection's callback registry.
pub type LocalCallbackFn = dyn Fn(Vec<Variant>) -> RpcResult<Variant> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Multi-shot, no reply; lives for the connection's lifetime.
    Notice,
    /// Removed from the registry once invoked and its reply sent.
    ReplyOnce,
}

#[derive(Clone)]
pub(crate) enum CallbackSink {
    Local(Arc<LocalCallbackFn>),
    Remote {
        connection: Weak<ApiConnection>,
        id: CallbackId,
        reply: bool,
    },
}

/// A function-valued argument with a single parameter `A` and result
/// `R` (default `()`).
pub struct Callback<A, R = ()> {
    pub(crate) sink: CallbackSink,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Callback {
            sink: self.sink.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> Callback<A, R>
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap a local closure. The closure runs on the executor of
    /// whichever connection later receives the matching inbound
    /// `notice`/`callback` frames.
    pub fn new<F>(function: F) -> Callback<A, R>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let erased: Arc<LocalCallbackFn> = Arc::new(move |args: Vec<Variant>| {
            let arg = args.into_iter().next().unwrap_or(Variant::Null);
            let arg: A = from_variant(&arg, json::DEFAULT_MAX_DEPTH)?;
            let out = function(arg);
            to_variant(&out, json::DEFAULT_MAX_DEPTH)
        });
        Callback {
            sink: CallbackSink::Local(erased),
            _signature: PhantomData,
        }
    }

    pub(crate) fn from_remote(
        connection: Weak<ApiConnection>,
        id: CallbackId,
        reply: bool,
    ) -> Callback<A, R> {
        Callback {
            sink: CallbackSink::Remote {
                connection,
                id,
                reply,
            },
            _signature: PhantomData,
        }
    }

    /// Fire-and-forget invocation. A remote callback whose connection
    /// has been torn down degrades to a no-op.
    pub fn notify(&self, arg: A) -> RpcResult<()> {
        match &self.sink {
            CallbackSink::Local(function) => {
                function(vec![to_variant(&arg, json::DEFAULT_MAX_DEPTH)?])?;
                Ok(())
            }
            CallbackSink::Remote { connection, id, .. } => {
                let Some(connection) = connection.upgrade() else {
                    return Ok(());
                };
                let arg = to_variant(&arg, connection.max_depth())?;
                connection.send_notice(*id, vec![arg])
            }
        }
    }

    /// Invoke and await the result. Remote reply-once callbacks round
    /// trip through a `callback` frame; notice-kind callbacks are
    /// fired and the empty result is returned.
    pub async fn call(&self, arg: A) -> RpcResult<R> {
        match &self.sink {
            CallbackSink::Local(function) => {
                let out = function(vec![to_variant(&arg, json::DEFAULT_MAX_DEPTH)?])?;
                from_variant(&out, json::DEFAULT_MAX_DEPTH)
            }
            CallbackSink::Remote {
                connection,
                id,
                reply,
            } => {
                let Some(connection) = connection.upgrade() else {
                    return Err(RpcError::connection_closed());
                };
                let arg = to_variant(&arg, connection.max_depth())?;
                if *reply {
                    let value = connection.send_callback(*id, vec![arg]).await?;
                    from_variant(&value, connection.max_depth())
                } else {
                    connection.send_notice(*id, vec![arg])?;
                    from_variant(&Variant::Null, connection.max_depth())
                }
            }
        }
    }

    /// Register this callback on `connection`, returning the id to
    /// substitute into the argument position. Each registration
    /// allocates a fresh id, including for the same function passed
    /// twice.
    pub(crate) fn register_on(
        &self,
        connection: &Arc<ApiConnection>,
        reply: bool,
    ) -> RpcResult<CallbackId> {
        let kind = if reply {
            CallbackKind::ReplyOnce
        } else {
            CallbackKind::Notice
        };
        match &self.sink {
            CallbackSink::Local(function) => connection.register_callback(kind, function.clone()),
            CallbackSink::Remote {
                connection: origin,
                id,
                reply: origin_reply,
            } => {
                // forwarding a callback received from another peer:
                // install a shim that relays invocations to its origin
                if *origin_reply {
                    return Err(RpcError::bad_cast(
                        "reply-once callbacks cannot be forwarded",
                    ));
                }
                let origin = origin.clone();
                let id = *id;
                let shim: Arc<LocalCallbackFn> = Arc::new(move |args: Vec<Variant>| {
                    if let Some(origin) = origin.upgrade() {
                        origin.send_notice(id, args)?;
                    }
                    Ok(Variant::Null)
                });
                connection.register_callback(kind, shim)
            }
        }
    }
}
