//! Error types for the sshlink library

use sshlink_transport::TransportError;
use thiserror::Error;

/// Main error type for sshlink operations
#[derive(Debug, Error)]
pub enum SshError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection could not be established or was lost
    #[error("{0}")]
    Connection(String),

    /// Authentication was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Host key verification failed
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// A channel on an established connection failed
    #[error("{0}")]
    Channel(String),

    /// SFTP session could not be opened
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// A scoped guard could not be created
    #[error("{message}")]
    Context {
        /// What the guard was doing
        message: String,
        /// Underlying failure
        #[source]
        source: Box<SshError>,
    },

    /// The client has no open connection
    #[error("Not connected")]
    NotConnected,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    /// Whether this error belongs to the connection family.
    ///
    /// Channel, SFTP and context failures all happen on (or while setting
    /// up) a connection and count as connection errors.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Channel(_)
                | Self::Sftp(_)
                | Self::Context { .. }
                | Self::NotConnected
                | Self::Timeout
        )
    }

    /// Wrap a failed connection attempt to `host`.
    ///
    /// Authentication, host key, timeout and configuration failures keep
    /// their own variants; everything else becomes a [`SshError::Connection`].
    pub(crate) fn connection_failed(host: &str, err: TransportError) -> Self {
        match err {
            TransportError::Authentication(_)
            | TransportError::HostKey(_)
            | TransportError::Timeout
            | TransportError::Configuration(_)
            | TransportError::Parse { .. } => err.into(),
            other => Self::Connection(format!(
                "Connection to '{}' failed with error: {}",
                host, other
            )),
        }
    }

    pub(crate) fn context(message: impl Into<String>, source: SshError) -> Self {
        Self::Context {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

impl From<TransportError> for SshError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(msg) => Self::Connection(msg),
            TransportError::Authentication(msg) => Self::Authentication(msg),
            TransportError::HostKey(msg) => Self::HostKey(msg),
            TransportError::Channel(msg) => Self::Channel(msg),
            TransportError::Sftp(msg) => Self::Sftp(msg),
            TransportError::Io(e) => Self::Io(e),
            TransportError::Timeout => Self::Timeout,
            TransportError::Configuration(msg) => Self::Configuration(msg),
            err @ TransportError::Parse { .. } => Self::Configuration(err.to_string()),
        }
    }
}
