/// WebSocket client configuration options
#[derive(Default, Clone)]
pub struct Options {
    /// Headers appended to the connection handshake request.
    pub headers: Vec<(String, String)>,
    /// Receiver channel capacity (unbounded when `None`)
    pub receiver_channel_cap: Option<usize>,
    /// Sender channel capacity (unbounded when `None`)
    pub sender_channel_cap: Option<usize>,
}
