//! Client side of the queue push service.
//!
//! # Architecture
//!
//! - **One session per topic**: every `(kind, target)` identity gets a
//!   single WebSocket session, shared by all of its subscribers and closed
//!   when the last one leaves.
//! - **Supervised reconnects**: a dropped session reconnects with bounded
//!   exponential backoff and gives up for good once the budget is spent.
//! - **Closed frame taxonomy**: inbound frames are parsed into the `Frame`
//!   enum and checked against the topic kind; anything else is dropped.
//! - **Ordered fan-out**: subscribe callbacks run first, then global
//!   listeners registered by event type.
//!
//! # Modules
//!
//! - `connection`: topic registry, sessions and listener lifecycle
//! - `manager`: facade used by the rest of the application
//! - `session`: connection task with keep-alive and reconnect loop
//! - `supervisor`: backoff policy
//! - `dispatcher`: frame parsing and listener tables
//! - `transport`: `Connector` seam and the WebSocket implementation
//! - `clock`: injectable timers

pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod message;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::ChannelConfig;
pub use connection::{ConnectionStatus, SubscriptionHandle};
pub use error::Error;
pub use manager::Manager;
