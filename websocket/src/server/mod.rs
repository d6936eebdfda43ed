//!
//! async WebSocket server functionality (requires tokio executor)
//!
use async_trait::async_trait;
use ferrite_core::channel::StopSignal;
use ferrite_log::*;
use futures::{future::FutureExt, select};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
pub use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{
    UnboundedReceiver as TokioUnboundedReceiver, UnboundedSender as TokioUnboundedSender,
};
use tokio_tungstenite::{accept_hdr_async_with_config, MaybeTlsStream, WebSocketStream};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
pub use tungstenite::protocol::frame::coding::CloseCode;
pub use tungstenite::protocol::{CloseFrame, WebSocketConfig};
pub use tungstenite::Message;

/// The stream type served to connection tasks: a plain TCP stream or a
/// TLS stream, depending on the server configuration.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// WebSocket stream sender for dispatching [`tungstenite::Message`].
pub type WebSocketSender = SplitSink<WsStream, Message>;
/// WebSocket stream receiver for receiving [`tungstenite::Message`].
pub type WebSocketReceiver = SplitStream<WsStream>;
/// WebSocketSink [`tokio::sync::mpsc::UnboundedSender`] for dispatching
/// messages from within [`WebSocketHandler::message`]. This is an
/// `MPSC` channel that can be cloned and retained externally for the
/// lifetime of the WebSocket connection.
pub type WebSocketSink = TokioUnboundedSender<Message>;

/// An accepted peer: the socket address, and the endpoint string used
/// for logging. The endpoint is the socket address rendered as text
/// unless the server is configured with a forward header key and the
/// peer's handshake request carried that header, in which case the
/// header value is used instead.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    pub endpoint: String,
}

/// TLS acceptor configuration: a PKCS#12 identity archive and the
/// password protecting it.
#[derive(Clone)]
pub struct TlsConfig {
    pub identity: Vec<u8>,
    pub password: String,
}

impl TlsConfig {
    pub fn new(identity: impl Into<Vec<u8>>, password: &str) -> Self {
        Self {
            identity: identity.into(),
            password: password.to_string(),
        }
    }

    fn acceptor(&self) -> Result<native_tls::TlsAcceptor> {
        let identity = native_tls::Identity::from_pkcs12(&self.identity, &self.password)
            .map_err(|err| Error::Tls(err.to_string()))?;
        native_tls::TlsAcceptor::builder(identity)
            .build()
            .map_err(|err| Error::Tls(err.to_string()))
    }
}

/// Server configuration supplied at construction.
#[derive(Default, Clone)]
pub struct ServerConfig {
    /// Underlying websocket protocol settings.
    pub ws: Option<WebSocketConfig>,
    /// Present when the server terminates TLS itself.
    pub tls: Option<TlsConfig>,
    /// When set, the value of this request header (if the peer sent
    /// it) replaces the observed remote endpoint for logging.
    pub forward_header_key: Option<String>,
}

/// Atomic counters that allow tracking connection counts and
/// cumulative message sizes in bytes (bandwidth consumption without
/// accounting for the websocket framing overhead).
pub struct WebSocketCounters {
    pub total_connections: Arc<AtomicUsize>,
    pub active_connections: Arc<AtomicUsize>,
    pub handshake_failures: Arc<AtomicUsize>,
    pub rx_bytes: Arc<AtomicUsize>,
    pub tx_bytes: Arc<AtomicUsize>,
}

impl Default for WebSocketCounters {
    fn default() -> Self {
        WebSocketCounters {
            total_connections: Arc::new(AtomicUsize::new(0)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            handshake_failures: Arc::new(AtomicUsize::new(0)),
            rx_bytes: Arc::new(AtomicUsize::new(0)),
            tx_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// WebSocketHandler trait that represents the WebSocket processor
/// functionality. This trait is supplied to the WebSocket server which
/// subsequently invokes its functions during websocket connection
/// and message processing.
#[async_trait]
pub trait WebSocketHandler
where
    Arc<Self>: Sync,
{
    /// Context type used by the impl trait to represent a websocket
    /// connection. This is the session-data slot: whatever the
    /// handshake returns is retained for the connection's lifetime and
    /// handed back on every message.
    type Context: Send + Sync;

    /// Called to determine if the connection should be accepted.
    fn accept(&self, _peer: &SocketAddr) -> bool {
        true
    }

    /// Called immediately when a connection is established.
    /// Returning an error terminates the connection.
    async fn connect(self: &Arc<Self>, _peer: &SocketAddr) -> Result<()> {
        Ok(())
    }

    /// Called upon websocket disconnection.
    async fn disconnect(self: &Arc<Self>, _ctx: Self::Context, _result: Result<()>) {}

    /// Called after [`Self::connect()`], once the message sink exists.
    /// Returns the connection context retained for the connection's
    /// lifetime. The sink can be cloned and retained for external
    /// message dispatch.
    async fn handshake(
        self: &Arc<Self>,
        peer: &Peer,
        sender: &mut WebSocketSender,
        receiver: &mut WebSocketReceiver,
        sink: &WebSocketSink,
    ) -> Result<Self::Context>;

    /// Called for every websocket message.
    /// Returning an error terminates the connection.
    async fn message(
        self: &Arc<Self>,
        ctx: &Self::Context,
        msg: Message,
        sink: &WebSocketSink,
    ) -> Result<()>;
}

/// WebSocketServer that provides the main websocket connection
/// and message processing loop that delivers messages to the
/// installed WebSocketHandler trait.
pub struct WebSocketServer<T>
where
    T: WebSocketHandler + Send + Sync + 'static + Sized,
{
    pub counters: Arc<WebSocketCounters>,
    pub handler: Arc<T>,
    stop: StopSignal,
    config: ServerConfig,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: Mutex<Vec<WebSocketSink>>,
    tls_acceptor: Option<native_tls::TlsAcceptor>,
}

impl<T> WebSocketServer<T>
where
    T: WebSocketHandler + Send + Sync + 'static,
{
    pub fn new(
        handler: Arc<T>,
        config: ServerConfig,
        counters: Option<Arc<WebSocketCounters>>,
    ) -> Result<Arc<Self>> {
        let tls_acceptor = match &config.tls {
            Some(tls) => Some(tls.acceptor()?),
            None => None,
        };

        Ok(Arc::new(WebSocketServer {
            counters: counters.unwrap_or_default(),
            handler,
            stop: StopSignal::new(),
            config,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            connections: Mutex::new(Vec::new()),
            tls_acceptor,
        }))
    }

    /// Bind the listening socket. `addr` may specify port `0` to let
    /// the OS choose; the effective port is available via
    /// [`WebSocketServer::local_addr`] afterwards.
    pub async fn bind(self: &Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(&addr).await.map_err(|err| {
            Error::Listen(format!(
                "WebSocket server unable to listen on `{addr}`: {err}",
            ))
        })?;
        *self.local_addr.lock().unwrap() = listener.local_addr().ok();
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    /// The bound address, available after [`WebSocketServer::bind`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Spawn the accept loop. [`WebSocketServer::bind`] must have been
    /// called first.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::NotListening)?;

        let self_ = self.clone();
        ferrite_core::task::spawn(async move {
            if let Err(err) = self_.listen(listener).await {
                log_error!("WebSocket server accept loop terminated: {}", err);
            }
        });

        Ok(())
    }

    async fn listen(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            select! {
                stream = listener.accept().fuse() => {
                    if let Ok((stream, socket_addr)) = stream {
                        if self.handler.accept(&socket_addr) {
                            self.accept(stream, socket_addr).await;
                        }
                    }
                },
                _ = self.stop.requested().fuse() => break,
            }
        }

        self.stop
            .acknowledge()
            .await
            .map_err(|err| Error::Done(err.to_string()))
    }

    async fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        self.counters
            .total_connections
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .active_connections
            .fetch_add(1, Ordering::Relaxed);

        let self_ = self.clone();
        ferrite_core::task::spawn(async move {
            if let Err(e) = self_.handle_connection(peer, stream).await {
                match e {
                    Error::Tungstenite(tungstenite::Error::ConnectionClosed)
                    | Error::Tungstenite(tungstenite::Error::Protocol(_))
                    | Error::Tungstenite(tungstenite::Error::Utf8) => (),
                    err => log_error!("Error processing connection: {}", err),
                }
            }
            self_
                .counters
                .active_connections
                .fetch_sub(1, Ordering::Relaxed)
        });
    }

    async fn handle_connection(self: &Arc<Self>, peer: SocketAddr, stream: TcpStream) -> Result<()> {
        let stream = match &self.tls_acceptor {
            Some(acceptor) => {
                let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor.clone());
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|err| Error::Tls(err.to_string()))?;
                MaybeTlsStream::NativeTls(tls_stream)
            }
            None => MaybeTlsStream::Plain(stream),
        };

        let forward_header_key = self.config.forward_header_key.clone();
        let forwarded = Arc::new(Mutex::new(None::<String>));
        let forwarded_ = forwarded.clone();
        let callback = move |request: &Request, response: Response| {
            if let Some(key) = forward_header_key.as_deref() {
                if let Some(value) = request.headers().get(key) {
                    if let Ok(value) = value.to_str() {
                        *forwarded_.lock().unwrap() = Some(value.to_string());
                    }
                }
            }
            Ok::<Response, ErrorResponse>(response)
        };

        let ws_stream = accept_hdr_async_with_config(stream, callback, self.config.ws).await?;

        let endpoint = forwarded
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| peer.to_string());
        let peer = Peer {
            addr: peer,
            endpoint,
        };

        self.handler.connect(&peer.addr).await?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (sink_sender, sink_receiver) = tokio::sync::mpsc::unbounded_channel::<Message>();
        self.connections.lock().unwrap().push(sink_sender.clone());

        let ctx = match self
            .handler
            .handshake(&peer, &mut ws_sender, &mut ws_receiver, &sink_sender)
            .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                self.counters
                    .handshake_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.forget_connection(&sink_sender);
                return Err(err);
            }
        };

        let result = self
            .connection_task(&ctx, ws_sender, ws_receiver, sink_sender.clone(), sink_receiver)
            .await;
        self.forget_connection(&sink_sender);
        self.handler.disconnect(ctx, result).await;

        Ok(())
    }

    fn forget_connection(&self, sink: &WebSocketSink) {
        self.connections
            .lock()
            .unwrap()
            .retain(|s| !s.same_channel(sink));
    }

    async fn connection_task(
        self: &Arc<Self>,
        ctx: &T::Context,
        mut ws_sender: WebSocketSender,
        mut ws_receiver: WebSocketReceiver,
        sink_sender: TokioUnboundedSender<Message>,
        mut sink_receiver: TokioUnboundedReceiver<Message>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                msg = sink_receiver.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        Message::Binary(data) => {
                            self.counters.tx_bytes.fetch_add(data.len(), Ordering::Relaxed);
                            ws_sender.send(Message::Binary(data)).await?;
                        },
                        Message::Text(text) => {
                            self.counters.tx_bytes.fetch_add(text.len(), Ordering::Relaxed);
                            ws_sender.send(Message::Text(text)).await?;
                        },
                        Message::Close(_) => {
                            ws_sender.send(msg).await?;
                            break;
                        },
                        msg => {
                            ws_sender.send(msg).await?;
                        }
                    }
                },
                msg = ws_receiver.next() => {
                    match msg {
                        Some(msg) => {
                            let msg = msg?;
                            match msg {
                                Message::Binary(data) => {
                                    self.counters.rx_bytes.fetch_add(data.len(), Ordering::Relaxed);
                                    self.handler.message(ctx, Message::Binary(data), &sink_sender).await?;
                                },
                                Message::Text(text) => {
                                    self.counters.rx_bytes.fetch_add(text.len(), Ordering::Relaxed);
                                    self.handler.message(ctx, Message::Text(text), &sink_sender).await?;
                                },
                                Message::Close(_) => {
                                    self.handler.message(ctx, msg, &sink_sender).await?;
                                    break;
                                },
                                Message::Ping(data) => {
                                    self.counters.rx_bytes.fetch_add(data.len(), Ordering::Relaxed);
                                    ws_sender.send(Message::Pong(data)).await?;
                                },
                                Message::Pong(data) => {
                                    self.counters.rx_bytes.fetch_add(data.len(), Ordering::Relaxed);
                                },
                                _ => { }
                            }
                        }
                        None => {
                            return Err(Error::AbnormalClose);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the accept loop to stop. Established connections keep
    /// running; use [`WebSocketServer::close_connections`] to
    /// terminate them too.
    pub fn stop(&self) -> Result<()> {
        self.stop
            .request_stop()
            .map_err(|err| Error::Stop(err.to_string()))
    }

    /// Blocks until the accept loop has stopped.
    pub async fn join(&self) -> Result<()> {
        self.stop
            .wait()
            .await
            .map_err(|err| Error::Join(err.to_string()))
    }

    /// Signal the accept loop to stop and block until it has stopped.
    pub async fn stop_and_join(&self) -> Result<()> {
        self.stop()?;
        self.join().await
    }

    /// Initiate a graceful close of every established connection.
    pub fn close_connections(&self) {
        let connections = self.connections.lock().unwrap().clone();
        for sink in connections {
            let _ = sink.send(Message::Close(None));
        }
    }
}
