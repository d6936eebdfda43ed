//! Channel plumbing for the ferrite crates, built on [`async_channel`].
//! Only the shapes the RPC stack actually uses live here: a paired
//! sender/receiver handle for message pumps, a oneshot for call
//! completions, and a stop handshake for long-running tasks.

pub use async_channel::{
    bounded, unbounded, Receiver, RecvError, SendError, Sender, TryRecvError, TrySendError,
};

/// Single-use completion channel (capacity one). Pending RPC calls and
/// send acknowledgements ride on these.
pub fn oneshot<T>() -> (Sender<T>, Receiver<T>) {
    bounded(1)
}

/// A sender/receiver pair retained as one value, so a message pump and
/// its producers can be handed around together and cloned per task.
#[derive(Debug, Clone)]
pub struct Channel<T = ()> {
    pub sender: Sender<T>,
    pub receiver: Receiver<T>,
}

impl<T> Channel<T> {
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn bounded(cap: usize) -> Self {
        let (sender, receiver) = bounded(cap);
        Self { sender, receiver }
    }

    pub async fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.sender.send(msg).await
    }

    pub fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(msg)
    }

    pub async fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv().await
    }
}

/// Cooperative stop handshake between a controller and one
/// long-running task (a dispatcher loop, an accept loop). The
/// controller requests the stop; the task observes it, winds down and
/// acknowledges. Both legs are capacity-one, so a stop requested
/// before the task reaches its select point is not lost.
#[derive(Debug)]
pub struct StopSignal {
    request_tx: Sender<()>,
    request_rx: Receiver<()>,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        StopSignal::new()
    }
}

impl StopSignal {
    pub fn new() -> StopSignal {
        let (request_tx, request_rx) = oneshot();
        let (ack_tx, ack_rx) = oneshot();
        StopSignal {
            request_tx,
            request_rx,
            ack_tx,
            ack_rx,
        }
    }

    /// Ask the task to stop without waiting for it to wind down.
    pub fn request_stop(&self) -> Result<(), TrySendError<()>> {
        self.request_tx.try_send(())
    }

    /// Task side: resolves once a stop has been requested.
    pub async fn requested(&self) {
        let _ = self.request_rx.recv().await;
    }

    /// Task side: report that the wind-down is complete.
    pub async fn acknowledge(&self) -> Result<(), SendError<()>> {
        self.ack_tx.send(()).await
    }

    /// Block until the task has acknowledged a stop.
    pub async fn wait(&self) -> Result<(), RecvError> {
        self.ack_rx.recv().await
    }

    /// Request a stop (idempotent, a stop already in flight is left
    /// alone) and block until the task acknowledges it.
    pub async fn stop_and_wait(&self) -> Result<(), RecvError> {
        let _ = self.request_tx.try_send(());
        self.ack_rx.recv().await
    }
}
