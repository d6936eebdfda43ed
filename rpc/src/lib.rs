//!
//! Reflective bidirectional JSON-RPC runtime over WebSocket.
//!
//! A process declares strongly-typed interfaces as traits carrying the
//! [`api`](macro@api) attribute, serves them to a remote peer over a
//! message-framed transport, and symmetrically consumes the peer's
//! interfaces through typed proxies. Supported across the wire:
//!
//! - operations addressed by compile-time ordinal over a per-interface
//!   descriptor shared by both peers;
//! - *object-returning* calls: an operation whose result is itself an
//!   interface yields a fresh handle, automatically registered and
//!   callable;
//! - *callback arguments*: function-valued arguments are registered on
//!   the caller side and invoked by the peer via reverse RPC;
//! - trailing-optional argument elision: `Option` tails may be omitted
//!   on the wire and are padded back on receipt.
//!
//! ### Serving
//! ```ignore
//! #[api]
//! pub trait Calculator {
//!     fn add(&self, a: i32, b: i32) -> i32;
//!     fn on_result(&self, callback: Callback<i32>);
//! }
//!
//! let api = Api::<dyn Calculator>::local(Arc::new(MyCalculator::default()));
//! server.on_connection(move |connection| {
//!     connection.register_api(&api).ok();
//! });
//! ```
//!
//! ### Consuming
//! ```ignore
//! let client = WebSocketApiClient::connect("ws://localhost:8090", Default::default()).await?;
//! let calc = client.connection().get_remote_api::<dyn Calculator>();
//! assert_eq!(calc.add(4, 5).await?, 9);
//! ```
//!

extern crate self as ferrite_rpc;

pub mod api;
pub mod callback;
pub mod cli;
pub mod client;
pub mod connection;
pub mod error;
mod imports;
pub mod json;
pub mod messages;
pub mod result;
pub mod server;
pub mod value;

pub use async_trait::async_trait;

///
/// `#[api]` attribute for declaring an RPC interface from a trait.
///
/// For `trait Foo` the attribute derives the interface descriptor
/// (`impl ApiInterface for dyn Foo`) with its ordered operation table
/// and vtable builder, and a typed async extension trait `FooApi`
/// implemented for `Api<dyn Foo>` — the proxy surface used against
/// both local and remote targets.
///
/// Parameter typing rules:
/// - `Option<T>` parameters are optional; trailing optionals may be
///   elided by the wire caller and are padded back with `None`.
/// - `Callback<A>` parameters travel as multi-shot notice callbacks;
///   `Callback<A, R>` as reply-once callbacks.
/// - A result of `Api<dyn Bar>` registers the returned object and
///   yields a handle; the proxy side returns a typed `Api<dyn Bar>`.
/// - Operations may return `RpcResult<T>` to report failures; the
///   dispatch loop converts them into error responses.
///
pub use ferrite_rpc_macros::api;

pub mod prelude {
    pub use crate::api::{Api, ApiInterface, ApiTarget, OperationDecl};
    pub use crate::callback::Callback;
    pub use crate::cli::Cli;
    pub use crate::client::{ClientOptions, WebSocketApiClient};
    pub use crate::connection::{ApiConnection, ApiId, CallbackId, RequestId, Transport};
    pub use crate::error::{ErrorKind, RpcError};
    pub use crate::json;
    pub use crate::messages::OpRef;
    pub use crate::result::RpcResult;
    pub use crate::server::{ServerOptions, WebSocketApiServer};
    pub use crate::value::{from_variant, to_variant, Variant, VariantObject};
    pub use ferrite_rpc_macros::api;
    pub use ferrite_websocket::server::TlsConfig;
}

#[cfg(test)]
mod tests;
