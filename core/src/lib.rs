//!
//! Async utilities shared by the ferrite crates: channel combinators
//! built on [`async_channel`] and task helpers backed by the tokio
//! runtime.
//!

extern crate self as ferrite_core;

pub mod channel;
pub mod task;

pub mod prelude {
    pub use crate::channel::{oneshot, Channel, StopSignal};
    pub use crate::task::{blocking, sleep, spawn, yield_now};
}
