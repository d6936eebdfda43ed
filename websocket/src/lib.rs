//!
//! Message-framed async WebSocket client and server used as the
//! ferrite RPC transport. The client connects over `ws://` or `wss://`
//! (TLS via `native-tls`) and may append custom handshake headers. The
//! server accepts plain or TLS connections, reports its listening
//! port, and can substitute the observed remote endpoint with the
//! value of a configured forward header (useful behind reverse
//! proxies).
//!

pub mod client;
pub mod server;

#[cfg(test)]
mod test;
