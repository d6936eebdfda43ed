//!
//! WebSocket RPC server: accepts connections, creates an
//! [`ApiConnection`] per peer and hands it to the `on_connection`
//! hook, where the host registers the APIs it serves. The connection
//! itself is the per-socket session data: it is retained as the
//! websocket handler context for the lifetime of the socket.
//!

use crate::connection::{ApiConnection, Transport};
use crate::error::RpcError;
use crate::json;
use crate::result::RpcResult;
use async_trait::async_trait;
use ferrite_log::*;
use ferrite_websocket::server::{
    CloseFrame, Message, Peer, Result as WsResult, ServerConfig, TlsConfig, WebSocketConfig,
    WebSocketHandler, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketSink,
};
use std::sync::{Arc, Mutex};

/// WebSocket RPC server options. The TLS variant differs from the
/// plain one only in carrying a [`TlsConfig`].
pub struct ServerOptions {
    /// Nesting bound applied to every frame encode/decode.
    pub max_depth: usize,
    /// See [`ServerConfig::forward_header_key`].
    pub forward_header_key: Option<String>,
    pub tls: Option<TlsConfig>,
    pub ws: Option<WebSocketConfig>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            max_depth: json::DEFAULT_MAX_DEPTH,
            forward_header_key: None,
            tls: None,
            ws: None,
        }
    }
}

pub type OnConnectionFn = Arc<dyn Fn(&Arc<ApiConnection>) + Send + Sync>;

struct WsServerTransport {
    sink: WebSocketSink,
    endpoint: String,
}

impl Transport for WsServerTransport {
    fn send_text(&self, text: String) -> RpcResult<()> {
        self.sink
            .send(Message::Text(text))
            .map_err(|_| RpcError::connection_closed())
    }

    fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        let _ = self.sink.send(Message::Close(Some(frame)));
    }

    fn remote_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct ApiServerHandler {
    max_depth: usize,
    on_connection: Mutex<Option<OnConnectionFn>>,
}

#[async_trait]
impl WebSocketHandler for ApiServerHandler {
    type Context = Arc<ApiConnection>;

    async fn handshake(
        self: &Arc<Self>,
        peer: &Peer,
        _sender: &mut WebSocketSender,
        _receiver: &mut WebSocketReceiver,
        sink: &WebSocketSink,
    ) -> WsResult<Arc<ApiConnection>> {
        let transport = Arc::new(WsServerTransport {
            sink: sink.clone(),
            endpoint: peer.endpoint.clone(),
        });
        let connection = ApiConnection::new(transport, self.max_depth);
        let on_connection = self.on_connection.lock().unwrap().clone();
        if let Some(on_connection) = on_connection {
            on_connection(&connection);
        }
        log_debug!("rpc server: connection from {}", peer.endpoint);
        Ok(connection)
    }

    async fn message(
        self: &Arc<Self>,
        ctx: &Self::Context,
        msg: Message,
        _sink: &WebSocketSink,
    ) -> WsResult<()> {
        match msg {
            Message::Text(text) => ctx.handle_message(&text).await,
            Message::Close(_) => ctx.close(),
            Message::Binary(_) => log_trace!(
                "rpc server [{}]: ignoring binary frame",
                ctx.remote_endpoint()
            ),
            _ => {}
        }
        Ok(())
    }

    async fn disconnect(self: &Arc<Self>, ctx: Self::Context, _result: WsResult<()>) {
        ctx.close();
    }
}

/// A WebSocket server publishing RPC APIs.
///
/// ```ignore
/// let server = WebSocketApiServer::new(ServerOptions::default())?;
/// server.on_connection(move |connection| {
///     connection.register_api(&login_api).ok();
/// });
/// server.listen("127.0.0.1:0").await?;
/// server.start_accept()?;
/// ```
pub struct WebSocketApiServer {
    ws_server: Arc<WebSocketServer<ApiServerHandler>>,
    handler: Arc<ApiServerHandler>,
}

impl WebSocketApiServer {
    pub fn new(options: ServerOptions) -> WsResult<WebSocketApiServer> {
        let handler = Arc::new(ApiServerHandler {
            max_depth: options.max_depth,
            on_connection: Mutex::new(None),
        });
        let config = ServerConfig {
            ws: options.ws,
            tls: options.tls,
            forward_header_key: options.forward_header_key,
        };
        let ws_server = WebSocketServer::new(handler.clone(), config, None)?;
        Ok(WebSocketApiServer { ws_server, handler })
    }

    /// Install the hook invoked once per accepted peer, before any of
    /// the peer's frames are dispatched.
    pub fn on_connection<F>(&self, handler: F)
    where
        F: Fn(&Arc<ApiConnection>) + Send + Sync + 'static,
    {
        *self.handler.on_connection.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Bind the listening socket. Port 0 requests an ephemeral port,
    /// reported by [`WebSocketApiServer::listening_port`].
    pub async fn listen(&self, addr: &str) -> WsResult<()> {
        self.ws_server.bind(addr).await
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.ws_server.local_addr().map(|addr| addr.port())
    }

    /// Start accepting connections.
    pub fn start_accept(&self) -> WsResult<()> {
        self.ws_server.start()
    }

    /// Stop accepting new connections. Established connections keep
    /// being served.
    pub fn stop_listening(&self) -> WsResult<()> {
        self.ws_server.stop()
    }

    /// Stop listening and close every established connection.
    pub async fn close(&self) -> WsResult<()> {
        self.ws_server.close_connections();
        self.ws_server.stop_and_join().await
    }
}
