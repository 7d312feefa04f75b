//! Error taxonomy for the notification listener

use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Broad failure category, used for logging and for hosts that only care
/// about how the worker went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Remote peer closed the connection normally
    TransportClosed,
    /// Any other connection-level failure (connect, decode, binary frame, I/O)
    TransportFailure,
    /// A file announced by the endpoint could not be loaded
    FileAccessFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::TransportClosed => "transport-closed",
            ErrorKind::TransportFailure => "transport-failure",
            ErrorKind::FileAccessFailure => "file-access-failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("connection closed by peer")]
    Closed,

    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("got binary frame ({len} bytes), expected text")]
    BinaryFrame { len: usize },

    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("DataLocation must be a string, got {0}")]
    InvalidLocation(serde_json::Value),

    #[error("failed to read {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is outside of {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl ListenerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListenerError::Closed => ErrorKind::TransportClosed,
            ListenerError::FileAccess { .. } | ListenerError::OutsideRoot { .. } => {
                ErrorKind::FileAccessFailure
            }
            ListenerError::Connect { .. }
            | ListenerError::Transport(_)
            | ListenerError::BinaryFrame { .. }
            | ListenerError::Decode(_)
            | ListenerError::InvalidLocation(_)
            | ListenerError::Runtime(_) => ErrorKind::TransportFailure,
        }
    }

    /// Classify a tungstenite error, folding the "peer already went away"
    /// variants into [`ListenerError::Closed`]
    pub fn from_transport(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ListenerError::Closed
            }
            other => ListenerError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ListenerError::Closed.kind(), ErrorKind::TransportClosed);
        assert_eq!(
            ListenerError::BinaryFrame { len: 3 }.kind(),
            ErrorKind::TransportFailure
        );
        let err = ListenerError::FileAccess {
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::FileAccessFailure);
        assert!(err.to_string().contains("/nonexistent"));
    }

    #[test]
    fn test_from_transport_folds_closed() {
        let err = ListenerError::from_transport(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, ListenerError::Closed));

        let err = ListenerError::from_transport(tungstenite::Error::AlreadyClosed);
        assert_eq!(err.kind(), ErrorKind::TransportClosed);

        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err = ListenerError::from_transport(tungstenite::Error::Io(io));
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }
}
