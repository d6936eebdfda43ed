use super::{error::Error, message::Ack, message::Message, options::Options, result::Result};
use ferrite_core::channel::{Channel, StopSignal};
use ferrite_log::*;
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::client::IntoClientRequest,
    tungstenite::protocol::Message as TsMessage, MaybeTlsStream, WebSocketStream,
};
use tungstenite::http::{HeaderName, HeaderValue};

impl From<Message> for TsMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => text.into(),
            Message::Binary(data) => data.into(),
            _ => {
                panic!("From<Message> for tungstenite::Message - invalid message type: {message:?}",)
            }
        }
    }
}

impl From<TsMessage> for Message {
    fn from(message: TsMessage) -> Self {
        match message {
            TsMessage::Text(text) => Message::Text(text),
            TsMessage::Binary(data) => Message::Binary(data),
            TsMessage::Close(_) => Message::Close,
            _ => panic!(
                "From<tungstenite::Message> for Message - invalid message type: {message:?}",
            ),
        }
    }
}

struct Settings {
    url: String,
    headers: Vec<(String, String)>,
}

pub struct WebSocketInterface {
    settings: Arc<Mutex<Settings>>,
    is_open: AtomicBool,
    receiver_channel: Channel<Message>,
    sender_channel: Channel<(Message, Ack)>,
    shutdown: StopSignal,
}

impl WebSocketInterface {
    pub fn new(
        url: &str,
        sender_channel: Channel<(Message, Ack)>,
        receiver_channel: Channel<Message>,
        options: Options,
    ) -> WebSocketInterface {
        let settings = Settings {
            url: url.to_string(),
            headers: options.headers,
        };

        WebSocketInterface {
            settings: Arc::new(Mutex::new(settings)),
            receiver_channel,
            sender_channel,
            is_open: AtomicBool::new(false),
            shutdown: StopSignal::new(),
        }
    }

    pub fn url(self: &Arc<Self>) -> String {
        self.settings.lock().unwrap().url.clone()
    }

    pub fn append_header(self: &Arc<Self>, key: &str, value: &str) {
        self.settings
            .lock()
            .unwrap()
            .headers
            .push((key.to_string(), value.to_string()));
    }

    pub fn is_open(self: &Arc<Self>) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn client_request(self: &Arc<Self>) -> Result<tungstenite::handshake::client::Request> {
        let settings = self.settings.lock().unwrap();
        let mut request = settings.url.as_str().into_client_request()?;
        for (key, value) in settings.headers.iter() {
            let key = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| Error::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::InvalidHeader(value.clone()))?;
            request.headers_mut().insert(key, value);
        }
        Ok(request)
    }

    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst) {
            return Err(Error::AlreadyConnected);
        }

        let request = self.client_request()?;
        let (ws_stream, _) = connect_async(request).await?;
        self.is_open.store(true, Ordering::SeqCst);

        let self_ = self.clone();
        ferrite_core::task::spawn(async move {
            if let Err(err) = self_.dispatcher(ws_stream).await {
                log_trace!("WebSocket dispatcher error: {err}");
            }
            self_.is_open.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn dispatcher(
        self: &Arc<Self>,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> Result<()> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        self.receiver_channel.send(Message::Open).await?;

        loop {
            tokio::select! {
                _ = self.shutdown.requested() => {
                    ws_sender.close().await?;
                    self.receiver_channel.send(Message::Close).await?;
                    self.shutdown.acknowledge().await?;
                    break;
                }
                dispatch = self.sender_channel.recv() => {
                    if let Ok((msg, ack)) = dispatch {
                        if let Some(ack_sender) = ack {
                            let result = ws_sender.send(msg.into()).await
                                .map(Arc::new)
                                .map_err(|err| Arc::new(err.into()));
                            ack_sender.send(result).await?;
                        } else {
                            ws_sender.send(msg.into()).await?;
                        }
                    }
                },
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            match msg {
                                TsMessage::Binary(_) | TsMessage::Text(_) => {
                                    self.receiver_channel.send(msg.into()).await?;
                                }
                                TsMessage::Close(_) => {
                                    self.receiver_channel.send(Message::Close).await?;
                                    break;
                                }
                                TsMessage::Ping(_) => { },
                                TsMessage::Pong(_) => { },
                                TsMessage::Frame(_) => { },
                            }
                        }
                        Some(Err(e)) => {
                            self.receiver_channel.send(Message::Close).await?;
                            log_trace!("WebSocket error: {}", e);
                            break;
                        }
                        None => {
                            self.receiver_channel.send(Message::Close).await?;
                            log_trace!("WebSocket connection closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn close(self: &Arc<Self>) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst)
            && self.shutdown.stop_and_wait().await.is_err()
        {
            log_error!("WebSocket dispatcher exited without acknowledging shutdown");
        }

        Ok(())
    }

    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        self.close().await
    }
}
