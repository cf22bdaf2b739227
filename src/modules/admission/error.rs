//! Admission gate error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur around the gate: listening, forwarding, config.
///
/// Allow-list failures are not listed here; they never leave the
/// admission path and only decide that a connection is closed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to accept a connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// Failed to connect to the upstream.
    #[error("failed to connect to upstream {address}: {source}")]
    UpstreamConnect {
        /// The upstream address.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the upstream took too long.
    #[error("connection timeout to upstream {address}")]
    UpstreamTimeout {
        /// The upstream address.
        address: SocketAddr,
    },

    /// IO error during data transfer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;
