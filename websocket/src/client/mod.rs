//!
//! async WebSocket client functionality (requires a tokio executor)
//!

mod native;
use native::WebSocketInterface;

pub mod error;
pub mod message;
pub mod options;
pub mod result;

pub use error::Error;
pub use message::{Ack, Message};
pub use options::Options;
pub use result::Result;

use ferrite_core::channel::{oneshot, Channel, Receiver, Sender};
use std::sync::Arc;

struct Inner {
    client: Arc<WebSocketInterface>,
    sender_channel: Channel<(Message, Ack)>,
    receiver_channel: Channel<Message>,
}

/// An async WebSocket connection handle. Cheaply cloneable; all clones
/// refer to the same underlying connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl WebSocket {
    /// Create a new WebSocket instance targeting the given URL.
    /// The connection is not established until [`WebSocket::connect`]
    /// is invoked.
    pub fn new(url: &str, options: Options) -> Result<WebSocket> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::AddressSchema(url.to_string()));
        }

        let receiver_channel = if let Some(cap) = options.receiver_channel_cap {
            Channel::bounded(cap)
        } else {
            Channel::<Message>::unbounded()
        };

        let sender_channel = if let Some(cap) = options.sender_channel_cap {
            Channel::bounded(cap)
        } else {
            Channel::<(Message, Ack)>::unbounded()
        };

        let client = Arc::new(WebSocketInterface::new(
            url,
            sender_channel.clone(),
            receiver_channel.clone(),
            options,
        ));

        let websocket = WebSocket {
            inner: Arc::new(Inner {
                client,
                sender_channel,
                receiver_channel,
            }),
        };

        Ok(websocket)
    }

    /// Get current websocket connection URL
    pub fn url(&self) -> String {
        self.inner.client.url()
    }

    /// Append a header to the connection handshake request. Has no
    /// effect on an already-established connection.
    pub fn append_header(&self, key: &str, value: &str) {
        self.inner.client.append_header(key, value);
    }

    /// Returns true if websocket is connected, false otherwise
    pub fn is_open(&self) -> bool {
        self.inner.client.is_open()
    }

    /// Establish the connection. Blocks until the handshake completes
    /// or fails. A severed connection is not re-established; callers
    /// wishing to reconnect create a new [`WebSocket`].
    pub async fn connect(&self) -> Result<()> {
        self.inner.client.connect().await
    }

    /// Disconnect from the destination server, blocking until the
    /// dispatcher has shut down.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.client.disconnect().await
    }

    /// Queue a message for delivery and return once it is enqueued.
    pub async fn post(&self, message: Message) -> Result<&Self> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        self.inner.sender_channel.send((message, None)).await?;
        ferrite_core::task::yield_now().await;
        Ok(self)
    }

    /// Synchronous variant of [`WebSocket::post`] for callers that can
    /// not suspend. The sender channel is unbounded unless configured
    /// otherwise.
    pub fn try_post(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        self.inner
            .sender_channel
            .try_send((message, None))
            .map_err(|_| Error::DispatchChannelTrySend)
    }

    /// Send a message, blocking until it has been handed to the
    /// underlying socket.
    pub async fn send(&self, message: Message) -> std::result::Result<&Self, Arc<Error>> {
        if !self.is_open() {
            return Err(Arc::new(Error::NotConnected));
        }

        let (ack_sender, ack_receiver) = oneshot();
        self.inner
            .sender_channel
            .send((message, Some(ack_sender)))
            .await
            .map_err(|err| Arc::new(err.into()))?;

        ack_receiver
            .recv()
            .await
            .map_err(|_| Arc::new(Error::DispatchChannelAck))?
            .map(|_| self)
    }

    /// Receive a message. Blocks until a message arrives from the
    /// underlying connection.
    pub async fn recv(&self) -> Result<Message> {
        Ok(self.inner.receiver_channel.receiver.recv().await?)
    }

    /// Reference to the receiver channel for external select loops.
    pub fn receiver_rx(&self) -> &Receiver<Message> {
        &self.inner.receiver_channel.receiver
    }

    /// Reference to the sender channel.
    pub fn sender_tx(&self) -> &Sender<(Message, Ack)> {
        &self.inner.sender_channel.sender
    }
}
