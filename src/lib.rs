//! Durable FIFO work queue.
//!
//! Producers append opaque payloads, consumers take them back in submission
//! order. Every mutation is journaled before it is acknowledged, and the
//! journals are replayed on startup, so the queue survives restarts and
//! crashes. Memory use is bounded by a byte budget; beyond it new items are
//! kept only on disk until the in-memory head drains.

pub mod clock;
pub mod engine;
pub mod error;
pub mod item;
pub mod journal;
pub mod protocol;
#[cfg(feature = "server")]
pub mod server;

pub use clock::{Clock, SystemClock};
pub use engine::{Engine, EngineConfig, EngineState, SharedEngine, Stats};
pub use error::{Error, Result};
pub use item::QueuedItem;
