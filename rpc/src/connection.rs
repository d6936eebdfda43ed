//!
//! The API connection: one per transport, owning the local API
//! registry, the pending-call map and the callback registry, and
//! dispatching every inbound frame.
//!
//! Inbound dispatch is serialized by construction: the transport glue
//! awaits [`ApiConnection::handle_message`] for one frame at a time,
//! so no two operations of the same connection run concurrently.
//! Outbound sends enqueue synchronously and preserve submission order.
//!

use crate::api::{Api, ApiInterface, CallScope, OperationFn, Vtable};
use crate::callback::{CallbackKind, LocalCallbackFn};
use crate::error::RpcError;
use crate::json;
use crate::messages::{self, Incoming, OpRef};
use crate::result::RpcResult;
use crate::value::Variant;
use ahash::AHashMap;
use ferrite_core::channel::{oneshot, Sender};
use ferrite_log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-connection identifier of a registered API. Handle 0 addresses
/// the bootstrap API (the first one registered).
pub type ApiId = u32;
pub type RequestId = u64;
pub type CallbackId = u64;

/// Message-framed transport surface the connection drives. Outbound
/// sends enqueue without suspending; inbound delivery is the glue
/// layer's responsibility.
pub trait Transport: Send + Sync + 'static {
    /// Enqueue one outbound text frame. Fails once the transport has
    /// closed.
    fn send_text(&self, text: String) -> RpcResult<()>;

    /// Initiate a graceful transport shutdown with a close code and
    /// reason. The `closed` signal (delivery of the close to the glue
    /// layer) fires exactly once.
    fn close(&self, code: u16, reason: &str);

    /// Remote endpoint rendered for logging.
    fn remote_endpoint(&self) -> String;
}

struct LocalApi {
    handle: ApiId,
    interface: &'static str,
    vtable: Arc<Vtable>,
}

struct PendingCall {
    sender: Sender<RpcResult<Variant>>,
}

struct CallbackRecord {
    kind: CallbackKind,
    function: Arc<LocalCallbackFn>,
}

#[derive(Default)]
struct Registries {
    closed: bool,
    locals: Vec<LocalApi>,
    handles_by_owner: AHashMap<usize, ApiId>,
    pending: AHashMap<RequestId, PendingCall>,
    callbacks: AHashMap<CallbackId, CallbackRecord>,
}

/// A bidirectional RPC endpoint bound to one transport.
pub struct ApiConnection {
    transport: Arc<dyn Transport>,
    max_depth: usize,
    next_request_id: AtomicU64,
    next_callback_id: AtomicU64,
    registries: Mutex<Registries>,
}

impl ApiConnection {
    pub fn new(transport: Arc<dyn Transport>, max_depth: usize) -> Arc<ApiConnection> {
        Arc::new(ApiConnection {
            transport,
            max_depth,
            next_request_id: AtomicU64::new(1),
            next_callback_id: AtomicU64::new(1),
            registries: Mutex::new(Registries::default()),
        })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn remote_endpoint(&self) -> String {
        self.transport.remote_endpoint()
    }

    pub fn is_closed(&self) -> bool {
        self.registries.lock().unwrap().closed
    }

    /// Register a local API and return its handle. Handles are
    /// allocated from 1; registering the same object again yields the
    /// handle assigned the first time. A proxy for an API imported
    /// from this same connection re-exports its existing handle.
    pub fn register_api<I: ApiInterface + ?Sized>(self: &Arc<Self>, api: &Api<I>) -> RpcResult<ApiId> {
        let Some(key) = api.owner_key() else {
            return api
                .remote_handle_on(self)
                .ok_or_else(|| RpcError::bad_cast("cannot register a proxy from another connection"));
        };

        if let Some(handle) = self.registries.lock().unwrap().handles_by_owner.get(&key) {
            return Ok(*handle);
        }

        let vtable = api.build_vtable().ok_or_else(|| RpcError::bad_cast("missing vtable"))?;

        let mut registries = self.registries.lock().unwrap();
        if registries.closed {
            return Err(RpcError::connection_closed());
        }
        // a racing registration of the same owner may have won
        if let Some(handle) = registries.handles_by_owner.get(&key) {
            return Ok(*handle);
        }
        let handle = registries.locals.len() as ApiId + 1;
        registries.locals.push(LocalApi {
            handle,
            interface: I::NAME,
            vtable: Arc::new(vtable),
        });
        registries.handles_by_owner.insert(key, handle);
        Ok(handle)
    }

    /// Typed proxy for the peer's bootstrap API (handle 0).
    pub fn get_remote_api<I: ApiInterface + ?Sized>(self: &Arc<Self>) -> Api<I> {
        Api::remote(self, 0)
    }

    /// Typed proxy for an explicit handle previously obtained from the
    /// peer.
    pub fn remote_api_at<I: ApiInterface + ?Sized>(self: &Arc<Self>, handle: ApiId) -> Api<I> {
        Api::remote(self, handle)
    }

    pub(crate) fn register_callback(
        &self,
        kind: CallbackKind,
        function: Arc<LocalCallbackFn>,
    ) -> RpcResult<CallbackId> {
        let mut registries = self.registries.lock().unwrap();
        if registries.closed {
            return Err(RpcError::connection_closed());
        }
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        registries.callbacks.insert(id, CallbackRecord { kind, function });
        Ok(id)
    }

    /// Discard a previously registered callback. Not propagated to the
    /// peer; stale inbound references are dropped and logged.
    pub fn discard_callback(&self, id: CallbackId) {
        self.registries.lock().unwrap().callbacks.remove(&id);
    }

    /// Submit a `call` request and await the matching response.
    pub async fn send_call(
        self: &Arc<Self>,
        api: ApiId,
        op: OpRef,
        args: Vec<Variant>,
    ) -> RpcResult<Variant> {
        self.roundtrip(|id| messages::call_frame(id, api, &op, args))
            .await
    }

    /// Submit a reverse `callback` request and await the reply.
    pub async fn send_callback(
        self: &Arc<Self>,
        callback: CallbackId,
        args: Vec<Variant>,
    ) -> RpcResult<Variant> {
        self.roundtrip(|id| messages::callback_frame(id, callback, args))
            .await
    }

    /// Emit a `notice` frame. No reply is expected.
    pub fn send_notice(&self, callback: CallbackId, args: Vec<Variant>) -> RpcResult<()> {
        if self.registries.lock().unwrap().closed {
            return Err(RpcError::connection_closed());
        }
        let text = json::to_string(&messages::notice_frame(callback, args), self.max_depth)?;
        self.transport.send_text(text)
    }

    async fn roundtrip(
        self: &Arc<Self>,
        frame: impl FnOnce(RequestId) -> Variant,
    ) -> RpcResult<Variant> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot();
        {
            let mut registries = self.registries.lock().unwrap();
            if registries.closed {
                return Err(RpcError::connection_closed());
            }
            registries.pending.insert(id, PendingCall { sender });
        }

        let submitted = json::to_string(&frame(id), self.max_depth)
            .and_then(|text| self.transport.send_text(text));
        if let Err(err) = submitted {
            self.registries.lock().unwrap().pending.remove(&id);
            return Err(err);
        }

        match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(RpcError::connection_closed()),
        }
    }

    /// Dispatch one inbound text frame. Structural errors produce an
    /// error response when the frame carried an id; otherwise the
    /// frame is dropped and logged. Errors never unwind out of here.
    pub async fn handle_message(self: &Arc<Self>, text: &str) {
        let value = match json::from_string(text, self.max_depth) {
            Ok(value) => value,
            Err(err) => {
                log_trace!(
                    "rpc [{}]: dropping unparseable frame: {}",
                    self.remote_endpoint(),
                    err
                );
                return;
            }
        };

        match messages::parse_incoming(value) {
            Ok(Incoming::Call { id, api, op, args }) => {
                let result = self.invoke_local(api, &op, args).await;
                self.respond(id, result);
            }
            Ok(Incoming::Callback { id, callback, args }) => {
                self.dispatch_callback(id, callback, args);
            }
            Ok(Incoming::Notice { callback, args }) => {
                self.dispatch_notice(callback, args);
            }
            Ok(Incoming::Response { id, result }) => {
                self.complete(id, result);
            }
            Err(frame_error) => match frame_error.id {
                Some(id) => self.respond(id, Err(frame_error.error)),
                None => log_trace!(
                    "rpc [{}]: dropping malformed frame: {}",
                    self.remote_endpoint(),
                    frame_error.error
                ),
            },
        }
    }

    async fn invoke_local(
        self: &Arc<Self>,
        api: ApiId,
        op: &OpRef,
        args: Vec<Variant>,
    ) -> RpcResult<Variant> {
        let thunk: OperationFn = {
            let registries = self.registries.lock().unwrap();
            let local = if api == 0 {
                registries.locals.first()
            } else {
                registries.locals.iter().find(|local| local.handle == api)
            };
            let local = local.ok_or_else(|| RpcError::unknown_api(api))?;
            let entry = match op {
                OpRef::Index(index) => local.vtable.by_index(*index),
                OpRef::Name(name) => local.vtable.by_name(name),
            };
            let entry = entry.ok_or_else(|| {
                RpcError::unknown_method(&format!("{}::{}", local.interface, op))
            })?;
            entry.thunk.clone()
        };
        thunk(CallScope::new(self.clone()), args).await
    }

    fn respond(&self, id: RequestId, result: RpcResult<Variant>) {
        let frame = match result {
            Ok(value) => messages::result_frame(id, value),
            Err(err) => messages::error_frame(id, &err),
        };
        // an over-deep result still owes the caller a response
        let text = json::to_string(&frame, self.max_depth)
            .or_else(|err| json::to_string(&messages::error_frame(id, &err), self.max_depth));
        let sent = text.and_then(|text| self.transport.send_text(text));
        if let Err(err) = sent {
            log_trace!(
                "rpc [{}]: unable to send response {}: {}",
                self.remote_endpoint(),
                id,
                err
            );
        }
    }

    fn dispatch_callback(&self, id: RequestId, callback: CallbackId, args: Vec<Variant>) {
        let function = {
            let mut registries = self.registries.lock().unwrap();
            let (reply_once, function) = match registries.callbacks.get(&callback) {
                Some(record) => (
                    record.kind == CallbackKind::ReplyOnce,
                    Some(record.function.clone()),
                ),
                None => (false, None),
            };
            if reply_once {
                registries.callbacks.remove(&callback);
            }
            function
        };

        let Some(function) = function else {
            let err = RpcError::unknown_callback(callback);
            log_trace!(
                "rpc [{}]: dropping callback frame ({}): {}",
                self.remote_endpoint(),
                err.code(),
                err
            );
            return;
        };
        let result = function(args);
        self.respond(id, result);
    }

    fn dispatch_notice(&self, callback: CallbackId, args: Vec<Variant>) {
        let function = {
            let registries = self.registries.lock().unwrap();
            registries
                .callbacks
                .get(&callback)
                .map(|record| record.function.clone())
        };

        match function {
            Some(function) => {
                if let Err(err) = function(args) {
                    log_trace!(
                        "rpc [{}]: notice handler for id {} failed: {}",
                        self.remote_endpoint(),
                        callback,
                        err
                    );
                }
            }
            None => {
                let err = RpcError::unknown_callback(callback);
                log_trace!(
                    "rpc [{}]: dropping notice ({}): {}",
                    self.remote_endpoint(),
                    err.code(),
                    err
                );
            }
        }
    }

    fn complete(&self, id: RequestId, result: RpcResult<Variant>) {
        let pending = self.registries.lock().unwrap().pending.remove(&id);
        match pending {
            Some(call) => {
                let _ = call.sender.try_send(result);
            }
            None => log_trace!(
                "rpc [{}]: dropping response with unknown id {}",
                self.remote_endpoint(),
                id
            ),
        }
    }

    /// Drive the connection to its terminal state: every pending call
    /// fails with `ConnectionClosed`, the registries are cleared, and
    /// subsequent sends are refused. Idempotent.
    pub fn close(&self) {
        let pending = {
            let mut registries = self.registries.lock().unwrap();
            if registries.closed {
                return;
            }
            registries.closed = true;
            registries.locals.clear();
            registries.handles_by_owner.clear();
            registries.callbacks.clear();
            std::mem::take(&mut registries.pending)
        };
        for (_, call) in pending {
            let _ = call.sender.try_send(Err(RpcError::connection_closed()));
        }
    }

    /// Close the transport, then the connection state.
    pub fn shutdown(&self) {
        self.transport.close(1000, "shutdown");
        self.close();
    }
}
