//! Ambient infrastructure shared by every queue_sync crate: command line and
//! environment configuration, and terminal logging.

pub mod config;
pub mod logging;
