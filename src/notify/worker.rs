//! Background worker: connect, receive loop and message dispatch

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::error::ListenerError;
use super::listener::ListenerConfig;
use super::payload::{Payload, PayloadSlot};
use super::protocol::Notification;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state published by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// How a worker ended
#[derive(Debug)]
pub enum WorkerExit {
    /// The host asked the worker to stop
    Stopped,
    /// The endpoint closed the connection
    PeerClosed,
    /// The receive loop hit an error and gave up
    Failed(ListenerError),
}

impl WorkerExit {
    pub fn error(&self) -> Option<&ListenerError> {
        match self {
            WorkerExit::Failed(e) => Some(e),
            _ => None,
        }
    }

    fn from_error(err: ListenerError) -> Self {
        match err {
            ListenerError::Closed => WorkerExit::PeerClosed,
            other => WorkerExit::Failed(other),
        }
    }
}

/// Interprets decoded notifications and fills the payload slot
pub struct Dispatcher {
    slot: PayloadSlot,
    allowed_root: Option<PathBuf>,
    continue_on_file_error: bool,
}

impl Dispatcher {
    pub fn new(slot: PayloadSlot, config: &ListenerConfig) -> Self {
        Self {
            slot,
            allowed_root: config.allowed_root.clone(),
            continue_on_file_error: config.continue_on_file_error,
        }
    }

    /// Decode and dispatch one text frame
    pub async fn handle_text(&self, text: &str) -> Result<(), ListenerError> {
        let notification = Notification::decode(text)?;
        self.dispatch(notification).await
    }

    pub async fn dispatch(&self, notification: Notification) -> Result<(), ListenerError> {
        match notification {
            Notification::Unrecognized(value) => {
                debug!("Got: {}", value);
                Ok(())
            }
            Notification::DataLocation(path) => {
                info!("Got DataLocation: {}", path.display());
                match self.load(&path).await {
                    Ok(payload) => {
                        info!("Got {} bytes of data from {}", payload.len(), path.display());
                        self.slot.store(payload);
                        Ok(())
                    }
                    Err(e) if self.continue_on_file_error => {
                        warn!("Skipping DataLocation ({}): {}", e.kind(), e);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn load(&self, path: &Path) -> Result<Payload, ListenerError> {
        let read_path = match &self.allowed_root {
            Some(root) => resolve_within(path, root).await?,
            None => path.to_path_buf(),
        };

        let data = tokio::fs::read(&read_path)
            .await
            .map_err(|source| ListenerError::FileAccess {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Payload::new(data, path.to_path_buf()))
    }
}

/// Canonicalize `path` and make sure it lies under `root`
async fn resolve_within(path: &Path, root: &Path) -> Result<PathBuf, ListenerError> {
    let canonical = |p: &Path| {
        let p = p.to_path_buf();
        async move {
            tokio::fs::canonicalize(&p)
                .await
                .map_err(|source| ListenerError::FileAccess { path: p, source })
        }
    };

    let resolved = canonical(path).await?;
    let root_resolved = canonical(root).await?;
    if resolved.starts_with(&root_resolved) {
        Ok(resolved)
    } else {
        Err(ListenerError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Run the connect/receive loop until stopped, closed or failed
pub async fn run(
    endpoint: &str,
    close_timeout: Duration,
    dispatcher: Dispatcher,
    state: &watch::Sender<ConnectionState>,
    mut shutdown: oneshot::Receiver<()>,
) -> WorkerExit {
    state.send_replace(ConnectionState::Connecting);
    info!("Connecting to {}", endpoint);

    let connected = tokio::select! {
        _ = &mut shutdown => None,
        result = connect_async(endpoint) => Some(result),
    };

    let exit = match connected {
        None => WorkerExit::Stopped,
        Some(Err(source)) => WorkerExit::Failed(ListenerError::Connect {
            endpoint: endpoint.to_string(),
            source,
        }),
        Some(Ok((mut ws, _response))) => {
            state.send_replace(ConnectionState::Connected);
            info!("Connected to {}", endpoint);
            receive_loop(&mut ws, &dispatcher, close_timeout, &mut shutdown).await
        }
    };

    state.send_replace(ConnectionState::Disconnected);
    report(&exit);
    exit
}

async fn receive_loop(
    ws: &mut WsStream,
    dispatcher: &Dispatcher,
    close_timeout: Duration,
    shutdown: &mut oneshot::Receiver<()>,
) -> WorkerExit {
    let exit = loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => {
                debug!("Shutdown requested, closing connection");
                break WorkerExit::Stopped;
            }
            frame = ws.next() => {
                let result = match frame {
                    None => Err(ListenerError::Closed),
                    Some(Ok(frame)) => handle_frame(dispatcher, frame).await,
                    Some(Err(e)) => Err(ListenerError::from_transport(e)),
                };
                if let Err(e) = result {
                    break WorkerExit::from_error(e);
                }
            }
        }
    };

    // Transport errors and remote closes leave nothing to hand-shake with
    let needs_close = match &exit {
        WorkerExit::Stopped => true,
        WorkerExit::PeerClosed => false,
        WorkerExit::Failed(e) => !matches!(
            e,
            ListenerError::Transport(_) | ListenerError::Connect { .. }
        ),
    };
    if needs_close {
        close(ws, close_timeout).await;
    }

    exit
}

async fn handle_frame(dispatcher: &Dispatcher, frame: Message) -> Result<(), ListenerError> {
    match frame {
        Message::Text(text) => dispatcher.handle_text(text.as_str()).await,
        Message::Binary(data) => Err(ListenerError::BinaryFrame { len: data.len() }),
        Message::Close(frame) => {
            debug!("Close frame received: {:?}", frame);
            Ok(())
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(()),
    }
}

/// Send a close frame and wait for the peer to finish the handshake
async fn close(ws: &mut WsStream, timeout: Duration) {
    if let Err(e) = ws.close(None).await {
        debug!("Close request failed: {}", e);
        return;
    }

    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        warn!("Peer did not finish close handshake within {:?}", timeout);
    }
}

fn report(exit: &WorkerExit) {
    match exit {
        WorkerExit::Stopped => info!("Listener stopped"),
        WorkerExit::PeerClosed => info!("Connection closed by peer"),
        WorkerExit::Failed(e) => error!("Listener failed ({}): {}", e.kind(), e),
    }
}

/// A running worker thread and the means to stop it
pub(crate) struct Worker {
    shutdown: Option<oneshot::Sender<()>>,
    thread: JoinHandle<WorkerExit>,
}

impl Worker {
    /// Spawn the worker thread with its own single-threaded runtime
    pub(crate) fn spawn(
        config: &ListenerConfig,
        slot: PayloadSlot,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let endpoint = config.endpoint.clone();
        let close_timeout = config.close_timeout();
        let dispatcher = Dispatcher::new(slot, config);

        let thread = std::thread::Builder::new()
            .name("frame-listener".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let exit = WorkerExit::Failed(ListenerError::Runtime(e));
                        report(&exit);
                        return exit;
                    }
                };
                runtime.block_on(run(
                    &endpoint,
                    close_timeout,
                    dispatcher,
                    &state,
                    shutdown_rx,
                ))
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread,
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Signal the worker and wait for its thread to end
    pub(crate) fn shutdown(mut self) -> Option<WorkerExit> {
        if let Some(tx) = self.shutdown.take() {
            // Err means the worker already returned
            let _ = tx.send(());
        }

        match self.thread.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("Listener worker panicked");
                None
            }
        }
    }
}
