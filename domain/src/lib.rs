//! Reconciliation of pushed and pulled queue state into what the view shows.
//!
//! - `reconciler`: pure merge rules for one ticket snapshot
//! - `tracker`: task that feeds a reconciler from the push channel and the
//!   refresh cycle and publishes `events::TrackerEvent`s
//! - `monitor`: service queue and dashboard watchers
//! - `gateway`: HTTP pull path

pub use channel::message::{TicketPayload, Topic};
pub use events::{TicketSnapshot, TicketStatus, TrackerEvent};

pub mod error;
pub mod gateway;
pub mod monitor;
pub mod reconciler;
pub mod tracker;

mod snapshot;
