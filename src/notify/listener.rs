//! Host-facing listener handle
//!
//! A [`Listener`] owns the payload slot and at most one background worker.
//! Hosts drive it through `start`, `stop`/`unregister` and `get_data`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::payload::{Payload, PayloadSlot};
use super::worker::{ConnectionState, Worker, WorkerExit};
use super::DEFAULT_ENDPOINT;

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// WebSocket URL of the endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Log unreadable files and keep listening instead of stopping
    #[serde(default)]
    pub continue_on_file_error: bool,
    /// Only load files under this directory (unset: trust the endpoint)
    #[serde(default)]
    pub allowed_root: Option<PathBuf>,
    /// How long to wait for the peer to acknowledge a close
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_close_timeout_ms() -> u64 {
    5000
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            continue_on_file_error: false,
            allowed_root: None,
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

pub struct Listener {
    config: ListenerConfig,
    slot: PayloadSlot,
    state: Arc<watch::Sender<ConnectionState>>,
    worker: Mutex<Option<Worker>>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            slot: PayloadSlot::new(),
            state: Arc::new(state),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Registration hook for hosts with a register/unregister convention; does nothing
    pub fn register(&self) {}

    /// Spawn the background worker
    ///
    /// Returns `false` without doing anything if a worker is already held,
    /// including one that has ended on its own but was not reaped by
    /// [`Listener::stop`] yet. Spawn failures are logged and also return `false`.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            debug!("Listener already started");
            return false;
        }

        match Worker::spawn(&self.config, self.slot.clone(), self.state.clone()) {
            Ok(w) => {
                info!("Listener started for {}", self.config.endpoint);
                *worker = Some(w);
                true
            }
            Err(e) => {
                error!("Failed to spawn listener worker: {}", e);
                false
            }
        }
    }

    /// Close the connection, wait for the worker to end and report how it ended
    ///
    /// Returns `None` when no worker was started. After this returns,
    /// [`Listener::start`] can spawn a new worker.
    pub fn stop(&self) -> Option<WorkerExit> {
        // Joining can take up to close_timeout, so don't hold the lock for it
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        worker.and_then(Worker::shutdown)
    }

    /// Same as [`Listener::stop`], discarding the exit reason
    pub fn unregister(&self) {
        if let Some(exit) = self.stop() {
            debug!("Listener unregistered: {:?}", exit);
        }
    }

    /// Whether a worker thread is alive right now
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that sees every connection state change; closes once the
    /// listener and its worker are gone
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Bytes of the most recently loaded file, or `None` if nothing arrived yet
    pub fn get_data(&self) -> Option<Arc<[u8]>> {
        self.slot.data()
    }

    pub fn latest(&self) -> Option<Payload> {
        self.slot.latest()
    }

    pub fn payload_slot(&self) -> PayloadSlot {
        self.slot.clone()
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new(ListenerConfig::default())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unregister();
    }
}
