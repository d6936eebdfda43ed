//!
//! WebSocket RPC client: connects to a server, binds an
//! [`ApiConnection`] to the socket and pumps inbound frames into it.
//! Typed proxies are obtained from the connection, starting with the
//! bootstrap API at handle 0.
//!

use crate::connection::{ApiConnection, Transport};
use crate::error::RpcError;
use crate::json;
use crate::result::RpcResult;
use ferrite_log::*;
use ferrite_websocket::client::{Message, Options as WsOptions, WebSocket};
use std::sync::Arc;

pub struct ClientOptions {
    /// Nesting bound applied to every frame encode/decode.
    pub max_depth: usize,
    /// Headers appended to the websocket handshake request.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            max_depth: json::DEFAULT_MAX_DEPTH,
            headers: Vec::new(),
        }
    }
}

struct WsClientTransport {
    ws: WebSocket,
}

impl Transport for WsClientTransport {
    fn send_text(&self, text: String) -> RpcResult<()> {
        self.ws
            .try_post(Message::Text(text))
            .map_err(|_| RpcError::connection_closed())
    }

    fn close(&self, _code: u16, _reason: &str) {
        let ws = self.ws.clone();
        ferrite_core::task::spawn(async move {
            let _ = ws.disconnect().await;
        });
    }

    fn remote_endpoint(&self) -> String {
        self.ws.url()
    }
}

/// A WebSocket client consuming RPC APIs.
pub struct WebSocketApiClient {
    ws: WebSocket,
    connection: Arc<ApiConnection>,
}

impl WebSocketApiClient {
    /// Connect to a `ws://` (or `wss://`) endpoint and start the
    /// receive pump.
    pub async fn connect(url: &str, options: ClientOptions) -> RpcResult<WebSocketApiClient> {
        Self::connect_impl(url, options, false).await
    }

    /// Connect over TLS. The URL must use the `wss://` scheme.
    pub async fn secure_connect(url: &str, options: ClientOptions) -> RpcResult<WebSocketApiClient> {
        Self::connect_impl(url, options, true).await
    }

    async fn connect_impl(
        url: &str,
        options: ClientOptions,
        secure: bool,
    ) -> RpcResult<WebSocketApiClient> {
        if secure && !url.starts_with("wss://") {
            return Err(RpcError::transport(format!(
                "secure connect requires a wss:// url, got `{url}`"
            )));
        }

        let ws_options = WsOptions {
            headers: options.headers,
            ..Default::default()
        };
        let ws = WebSocket::new(url, ws_options).map_err(|err| RpcError::transport(err.to_string()))?;
        ws.connect()
            .await
            .map_err(|err| RpcError::transport(err.to_string()))?;

        let transport = Arc::new(WsClientTransport { ws: ws.clone() });
        let connection = ApiConnection::new(transport, options.max_depth);

        let ws_ = ws.clone();
        let connection_ = connection.clone();
        ferrite_core::task::spawn(async move {
            loop {
                match ws_.recv().await {
                    Ok(Message::Text(text)) => connection_.handle_message(&text).await,
                    Ok(Message::Binary(_)) => {
                        log_trace!("rpc client: ignoring binary frame")
                    }
                    Ok(Message::Open) => {}
                    Ok(Message::Close) | Err(_) => {
                        connection_.close();
                        break;
                    }
                }
            }
        });

        Ok(WebSocketApiClient { ws, connection })
    }

    /// The RPC connection bound to this socket. Obtain typed proxies
    /// from it, starting with
    /// [`get_remote_api`](ApiConnection::get_remote_api).
    pub fn connection(&self) -> &Arc<ApiConnection> {
        &self.connection
    }

    pub fn is_open(&self) -> bool {
        self.ws.is_open()
    }

    /// Close the socket and block until it has shut down; pending
    /// calls fail with `ConnectionClosed`.
    pub async fn synchronous_close(&self) -> RpcResult<()> {
        self.ws
            .disconnect()
            .await
            .map_err(|err| RpcError::transport(err.to_string()))?;
        self.connection.close();
        Ok(())
    }
}
