//! Transport-specific error types

use std::io;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// SSH connection error
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Host key verification error
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// Channel could not be opened
    #[error("Channel error: {0}")]
    Channel(String),

    /// SFTP subsystem error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// SSH config file parse error
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number in the config file
        line: usize,
        /// Error message
        message: String,
    },
}

#[cfg(feature = "ssh2")]
impl From<ssh2::Error> for TransportError {
    fn from(err: ssh2::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Connection(format!("Background task failed: {}", err))
    }
}
