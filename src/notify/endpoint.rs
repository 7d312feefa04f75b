//! Minimal endpoint that announces files to connecting clients
//!
//! Every client gets `WelcomeClient`, then one `DataLocation` per file, then a
//! close. Useful for driving a listener by hand.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::Protocol;

/// Build the message sequence sent to every client
///
/// Paths are made absolute so clients running elsewhere can open them.
pub fn announcements(files: &[PathBuf]) -> Result<Vec<Protocol>> {
    let mut messages = vec![Protocol::WelcomeClient];
    for file in files {
        let path = std::fs::canonicalize(file)
            .with_context(|| format!("Failed to resolve {}", file.display()))?;
        let path = path
            .to_str()
            .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))?;
        messages.push(Protocol::DataLocation(path.to_string()));
    }
    Ok(messages)
}

/// Bind `bind_addr` and serve announcements for `files` until the task is dropped
pub async fn serve(bind_addr: &str, files: &[PathBuf]) -> Result<()> {
    let messages = announcements(files)?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Endpoint listening on {}", listener.local_addr()?);
    serve_listener(listener, messages).await
}

pub async fn serve_listener(listener: TcpListener, messages: Vec<Protocol>) -> Result<()> {
    let messages: Arc<[Protocol]> = messages.into();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let messages = messages.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, &messages).await {
                        tracing::warn!("Error handling client {}: {:#}", peer, e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, messages: &[Protocol]) -> Result<()> {
    let mut ws = accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    tracing::info!("New client connected");

    for message in messages {
        let text = serde_json::to_string(message).context("Failed to serialize message")?;
        ws.send(Message::text(text))
            .await
            .context("Failed to send message")?;
    }

    ws.close(None).await.context("Failed to close connection")?;
    while let Some(Ok(_)) = ws.next().await {}
    tracing::debug!("Sent {} messages", messages.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::protocol::Notification;
    use tempfile::tempdir;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_announcements_resolve_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.bin");
        std::fs::write(&path, b"frame").unwrap();

        let messages = announcements(&[path.clone()]).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Protocol::WelcomeClient);
        let expected = std::fs::canonicalize(&path).unwrap();
        assert_eq!(
            messages[1],
            Protocol::DataLocation(expected.to_str().unwrap().to_string())
        );
    }

    #[test]
    fn test_announcements_missing_file() {
        let err = announcements(&[PathBuf::from("/nonexistent/frame.bin")]).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/frame.bin"));
    }

    #[tokio::test]
    async fn test_client_receives_announcements() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = vec![
            Protocol::WelcomeClient,
            Protocol::DataLocation("/dev/shm/frame".to_string()),
        ];
        let server = tokio::spawn(serve_listener(listener, messages));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let mut received = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                received.push(Notification::decode(text.as_str()).unwrap());
            }
        }

        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], Notification::Unrecognized(_)));
        assert_eq!(
            received[1],
            Notification::DataLocation(PathBuf::from("/dev/shm/frame"))
        );
        server.abort();
    }
}
