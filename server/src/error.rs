//! Error types for the server core.
//!
//! Only [`ServerError::TransportFailure`] is fatal, and only at startup. Every
//! other variant is scoped to a single connection or task and ends up in a log
//! line or a close reason.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol mismatch: client {client}, server {server}")]
    ProtocolMismatch { client: String, server: String },

    #[error("no free identity in the player namespace")]
    CapacityExceeded,

    #[error("record store unavailable: {0}")]
    RecordStoreUnavailable(#[from] StoreError),

    #[error("malformed state during {operation}: {detail}")]
    MalformedState {
        operation: &'static str,
        detail: String,
    },

    #[error("transport failure on {addr}: {source}")]
    TransportFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ServerError {
    /// Text sent to a peer whose connection is closed because of this error.
    pub fn close_reason(&self) -> String {
        match self {
            ServerError::ProtocolMismatch { client, server } => {
                format!("Invalid Version. [Client: {client}] [Server: {server}]")
            }
            ServerError::CapacityExceeded => "Server is full.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Failure reported by an external record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store connection failed: {0}")]
    Connection(String),

    #[error("record store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },
}
