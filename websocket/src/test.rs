use crate::client::{Message as ClientMessage, Options, WebSocket};
use crate::server::{
    Message as ServerMessage, Peer, Result as ServerResult, ServerConfig, WebSocketHandler,
    WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketSink,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    WebSocketClient(#[from] crate::client::Error),

    #[error(transparent)]
    WebSocketServer(#[from] crate::server::Error),
}

type Result<T> = std::result::Result<T, Error>;

struct EchoContext {
    peer: Peer,
}

struct EchoHandler;

#[async_trait]
impl WebSocketHandler for EchoHandler {
    type Context = Arc<EchoContext>;

    async fn connect(self: &Arc<Self>, _peer: &SocketAddr) -> ServerResult<()> {
        Ok(())
    }

    async fn handshake(
        self: &Arc<Self>,
        peer: &Peer,
        _sender: &mut WebSocketSender,
        _receiver: &mut WebSocketReceiver,
        _sink: &WebSocketSink,
    ) -> ServerResult<Arc<EchoContext>> {
        Ok(Arc::new(EchoContext { peer: peer.clone() }))
    }

    async fn message(
        self: &Arc<Self>,
        ctx: &Self::Context,
        msg: ServerMessage,
        sink: &WebSocketSink,
    ) -> ServerResult<()> {
        match &msg {
            ServerMessage::Binary(_) | ServerMessage::Text(_) => {
                sink.send(msg)?;
            }
            _ => {
                ferrite_log::log_debug!("[{}] {:?}", ctx.peer.endpoint, msg);
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn websocket_echo() -> Result<()> {
    let server = WebSocketServer::new(Arc::new(EchoHandler), ServerConfig::default(), None)?;
    server.bind("127.0.0.1:0").await?;
    let addr = server.local_addr().expect("server local_addr");
    server.start()?;

    let client = WebSocket::new(&format!("ws://{addr}"), Options::default())?;
    client.connect().await?;

    let open = client.recv().await?;
    assert_eq!(open, ClientMessage::Open);

    client.post(ClientMessage::Text("Hello, world!".into())).await?;
    let echoed = client.recv().await?;
    assert_eq!(echoed, ClientMessage::Text("Hello, world!".into()));

    client.disconnect().await?;
    server.stop_and_join().await?;

    Ok(())
}

#[tokio::test]
async fn websocket_forward_header() -> Result<()> {
    let config = ServerConfig {
        forward_header_key: Some("MyProxyHeaderKey".to_string()),
        ..Default::default()
    };

    let (endpoint_tx, endpoint_rx) = ferrite_core::channel::oneshot::<String>();

    struct HeaderHandler {
        endpoint_tx: ferrite_core::channel::Sender<String>,
    }

    #[async_trait]
    impl WebSocketHandler for HeaderHandler {
        type Context = ();

        async fn handshake(
            self: &Arc<Self>,
            peer: &Peer,
            _sender: &mut WebSocketSender,
            _receiver: &mut WebSocketReceiver,
            _sink: &WebSocketSink,
        ) -> ServerResult<()> {
            self.endpoint_tx
                .try_send(peer.endpoint.clone())
                .map_err(|_| crate::server::Error::Sink)?;
            Ok(())
        }

        async fn message(
            self: &Arc<Self>,
            _ctx: &Self::Context,
            _msg: ServerMessage,
            _sink: &WebSocketSink,
        ) -> ServerResult<()> {
            Ok(())
        }
    }

    let server = WebSocketServer::new(
        Arc::new(HeaderHandler { endpoint_tx }),
        config,
        None,
    )?;
    server.bind("127.0.0.1:0").await?;
    let addr = server.local_addr().expect("server local_addr");
    server.start()?;

    let client = WebSocket::new(&format!("ws://{addr}"), Options::default())?;
    client.append_header("MyProxyHeaderKey", "10.0.0.7:4242");
    client.connect().await?;

    let endpoint = endpoint_rx.recv().await.expect("endpoint");
    assert_eq!(endpoint, "10.0.0.7:4242");

    client.disconnect().await?;
    server.stop_and_join().await?;

    Ok(())
}
