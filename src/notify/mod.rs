//! Notification listener for frame announcements
//!
//! This module keeps one WebSocket connection to a local endpoint, loads the
//! files it announces via `DataLocation` messages and hands the latest bytes
//! to the host through [`Listener::get_data`].

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod payload;
pub mod protocol;
pub mod worker;

pub use error::{ErrorKind, ListenerError};
pub use listener::{Listener, ListenerConfig};
pub use payload::{Payload, PayloadSlot};
pub use protocol::{Notification, Protocol};
pub use worker::{ConnectionState, WorkerExit};

/// Endpoint the listener connects to unless configured otherwise
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:9005";

/// Address the bundled endpoint binds to by default
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9005";
