//!
//! Interface descriptors, vtables and typed API handles.
//!
//! An interface is declared once as a trait carrying the
//! [`api`](macro@crate::api) attribute. The attribute derives, for
//! `dyn Trait`, an [`ApiInterface`] implementation — the descriptor:
//! the interface name, the ordered operation table, and a vtable
//! builder binding any implementing object to dispatch thunks — plus a
//! typed async extension trait over [`Api<dyn Trait>`], the proxy
//! surface.
//!
//! [`Api`] is either a local object (operations dispatch straight into
//! the owner, no marshalling) or a remote handle (operations marshal
//! their arguments and round trip through the connection). Both peers
//! must declare operations in the same order: calls address them by
//! zero-based ordinal on the wire.
//!

use crate::callback::Callback;
use crate::connection::{ApiConnection, ApiId};
use crate::error::RpcError;
use crate::messages::OpRef;
use crate::result::RpcResult;
use crate::value::{from_variant, to_variant, Variant};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};

/// Future returned by a vtable thunk.
pub type OperationFuture = BoxFuture<'static, RpcResult<Variant>>;

/// A bound dispatch thunk: checks arity, converts each argument to its
/// declared type, invokes the owner and converts the result back.
pub type OperationFn = Arc<dyn Fn(CallScope, Vec<Variant>) -> OperationFuture + Send + Sync>;

/// One operation in an interface descriptor. Arguments beyond
/// `required` are declared optional; only those may be elided by the
/// caller.
#[derive(Debug, Clone, Copy)]
pub struct OperationDecl {
    pub name: &'static str,
    pub required: usize,
    pub total: usize,
}

/// The compile-time descriptor of an RPC interface, implemented for
/// `dyn Trait` by the [`api`](macro@crate::api) attribute. The
/// descriptor is immutable; vtables may be produced repeatedly and
/// share no mutable state.
pub trait ApiInterface: Send + Sync + 'static {
    /// Interface name used in logs and diagnostics.
    const NAME: &'static str;

    /// The ordered operation table. Order is wire-significant.
    fn operations() -> &'static [OperationDecl];

    /// Bind an implementing object into a vtable of dispatch thunks.
    fn vtable(owner: Arc<Self>) -> Vtable;
}

pub struct VtableEntry {
    pub name: &'static str,
    pub required: usize,
    pub total: usize,
    pub thunk: OperationFn,
}

/// Mapping from operation name/ordinal to an invocable thunk over one
/// concrete owner.
#[derive(Default)]
pub struct Vtable {
    entries: Vec<VtableEntry>,
}

impl Vtable {
    pub fn new() -> Vtable {
        Vtable::default()
    }

    pub fn operation(&mut self, name: &'static str, required: usize, total: usize, thunk: OperationFn) {
        self.entries.push(VtableEntry {
            name,
            required,
            total,
            thunk,
        });
    }

    pub fn by_name(&self, name: &str) -> Option<&VtableEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn by_index(&self, index: usize) -> Option<&VtableEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dispatch context handed to vtable thunks: argument conversion,
/// arity enforcement, callback substitution and result marshalling,
/// all against the connection the call arrived on.
#[derive(Clone)]
pub struct CallScope {
    connection: Arc<ApiConnection>,
}

impl CallScope {
    pub(crate) fn new(connection: Arc<ApiConnection>) -> CallScope {
        CallScope { connection }
    }

    pub fn connection(&self) -> &Arc<ApiConnection> {
        &self.connection
    }

    pub fn expect_arity(
        &self,
        op: &str,
        given: usize,
        required: usize,
        total: usize,
    ) -> RpcResult<()> {
        if given < required || given > total {
            Err(RpcError::bad_arity(op, given, required, total))
        } else {
            Ok(())
        }
    }

    pub fn typed_arg<T: DeserializeOwned>(&self, args: &[Variant], index: usize) -> RpcResult<T> {
        let value = args
            .get(index)
            .ok_or_else(|| RpcError::bad_argument(index, "missing argument"))?;
        from_variant(value, self.connection.max_depth())
            .map_err(|err| RpcError::bad_argument(index, err.message()))
    }

    /// Elided tail positions and explicit nulls both produce `None`.
    pub fn optional_arg<T: DeserializeOwned>(
        &self,
        args: &[Variant],
        index: usize,
    ) -> RpcResult<Option<T>> {
        match args.get(index) {
            None | Some(Variant::Null) => Ok(None),
            Some(value) => from_variant(value, self.connection.max_depth())
                .map(Some)
                .map_err(|err| RpcError::bad_argument(index, err.message())),
        }
    }

    /// Replace a wire callback id with a live [`Callback`] bound to
    /// this connection.
    pub fn callback_arg<A, R>(
        &self,
        args: &[Variant],
        index: usize,
        reply: bool,
    ) -> RpcResult<Callback<A, R>>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let value = args
            .get(index)
            .ok_or_else(|| RpcError::bad_argument(index, "missing argument"))?;
        let id = value.as_u64().ok_or_else(|| {
            RpcError::bad_argument(
                index,
                &format!("expected a callback id, got {}", value.kind_name()),
            )
        })?;
        Ok(Callback::from_remote(
            Arc::downgrade(&self.connection),
            id,
            reply,
        ))
    }

    pub fn value_result<T: Serialize>(&self, value: T) -> RpcResult<Variant> {
        to_variant(&value, self.connection.max_depth())
    }

    pub fn unit_result(&self) -> RpcResult<Variant> {
        Ok(Variant::Null)
    }

    /// Register an interface-valued result on this connection and
    /// return its fresh handle.
    pub fn api_result<I: ApiInterface + ?Sized>(&self, api: Api<I>) -> RpcResult<Variant> {
        let handle = self.connection.register_api(&api)?;
        Ok(Variant::UInt64(handle as u64))
    }
}

/// The two faces of an API handle.
pub enum ApiTarget<I: ApiInterface + ?Sized> {
    /// A local object; operations dispatch straight into it.
    Local(Arc<I>),
    /// A handle on a peer connection; operations round trip.
    Remote(RemoteApi),
}

impl<I: ApiInterface + ?Sized> Clone for ApiTarget<I> {
    fn clone(&self) -> Self {
        match self {
            ApiTarget::Local(owner) => ApiTarget::Local(owner.clone()),
            ApiTarget::Remote(remote) => ApiTarget::Remote(remote.clone()),
        }
    }
}

/// A typed API handle over the interface `I` (`dyn Trait`). Operations
/// are exposed by the extension trait the [`api`](macro@crate::api)
/// attribute generates.
pub struct Api<I: ApiInterface + ?Sized> {
    target: ApiTarget<I>,
}

impl<I: ApiInterface + ?Sized> Clone for Api<I> {
    fn clone(&self) -> Self {
        Api {
            target: self.target.clone(),
        }
    }
}

impl<I: ApiInterface + ?Sized> Api<I> {
    /// Bind a local implementing object.
    pub fn local(owner: Arc<I>) -> Api<I> {
        Api {
            target: ApiTarget::Local(owner),
        }
    }

    pub(crate) fn remote(connection: &Arc<ApiConnection>, handle: ApiId) -> Api<I> {
        Api {
            target: ApiTarget::Remote(RemoteApi {
                connection: Arc::downgrade(connection),
                handle,
            }),
        }
    }

    pub fn target(&self) -> &ApiTarget<I> {
        &self.target
    }

    pub fn is_local(&self) -> bool {
        matches!(self.target, ApiTarget::Local(_))
    }

    /// Identity of the underlying object, used to deduplicate
    /// registrations. `None` for remote handles.
    pub(crate) fn owner_key(&self) -> Option<usize> {
        match &self.target {
            ApiTarget::Local(owner) => Some(Arc::as_ptr(owner) as *const () as usize),
            ApiTarget::Remote(_) => None,
        }
    }

    pub(crate) fn build_vtable(&self) -> Option<Vtable> {
        match &self.target {
            ApiTarget::Local(owner) => Some(I::vtable(owner.clone())),
            ApiTarget::Remote(_) => None,
        }
    }

    pub(crate) fn remote_handle_on(&self, connection: &Arc<ApiConnection>) -> Option<ApiId> {
        match &self.target {
            ApiTarget::Remote(remote) => {
                let origin = remote.connection.upgrade()?;
                Arc::ptr_eq(&origin, connection).then_some(remote.handle)
            }
            ApiTarget::Local(_) => None,
        }
    }
}

/// The remote face of an [`Api`]: a weak reference to its connection
/// and the peer-assigned handle. The protocol is stateless per call,
/// so dropping a proxy sends nothing.
#[derive(Clone)]
pub struct RemoteApi {
    connection: Weak<ApiConnection>,
    handle: ApiId,
}

impl RemoteApi {
    fn connection(&self) -> RpcResult<Arc<ApiConnection>> {
        self.connection
            .upgrade()
            .ok_or_else(RpcError::connection_closed)
    }

    pub fn handle(&self) -> ApiId {
        self.handle
    }

    pub fn marshal<T: Serialize>(&self, value: &T) -> RpcResult<Variant> {
        let connection = self.connection()?;
        to_variant(value, connection.max_depth())
    }

    /// Register a function-valued argument on the connection and
    /// substitute its callback id.
    pub fn marshal_callback<A, R>(&self, callback: Callback<A, R>, reply: bool) -> RpcResult<Variant>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let connection = self.connection()?;
        let id = callback.register_on(&connection, reply)?;
        Ok(Variant::UInt64(id))
    }

    /// Submit a call addressed by operation ordinal and await the
    /// response.
    pub async fn call(&self, op: usize, args: Vec<Variant>) -> RpcResult<Variant> {
        let connection = self.connection()?;
        connection.send_call(self.handle, OpRef::Index(op), args).await
    }

    pub fn unmarshal<T: DeserializeOwned>(&self, value: Variant) -> RpcResult<T> {
        let connection = self.connection()?;
        from_variant(&value, connection.max_depth())
    }

    /// Interpret a response payload as a handle and wrap it in a typed
    /// proxy over the same connection.
    pub fn remote_api<I: ApiInterface + ?Sized>(&self, value: Variant) -> RpcResult<Api<I>> {
        let connection = self.connection()?;
        let handle = value
            .as_u64()
            .and_then(|handle| ApiId::try_from(handle).ok())
            .ok_or_else(|| {
                RpcError::bad_cast(format!("expected an api handle, got {}", value.kind_name()))
            })?;
        Ok(Api::remote(&connection, handle))
    }
}
