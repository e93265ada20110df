//! # sshlink transport
//!
//! SSH config file parsing and the libssh2-backed transport used by `sshlink`.

#![warn(missing_docs)]

/// SSH configuration file parsing and host lookup
pub mod ssh_config;

/// Connection configuration record
pub mod config;

/// Transport abstraction and the libssh2 implementation
pub mod transport;

/// Loopback socket bridges for tunnels and proxy commands
pub mod tunnel;

/// Transport-specific error types
pub mod error;

pub use config::{
    ConnectConfig, ConnectConfigBuilder, HostKeyPolicy, Sock, DEFAULT_SSH_CONFIG, SSH_PORT,
};
pub use error::TransportError;
pub use ssh_config::{load_ssh_config, HostOptions, SshConfigFile};
pub use transport::{CommandStream, ConnectionInfo, Session, Transport, TransportType};
#[cfg(feature = "ssh2")]
pub use transport::{Libssh2Session, Libssh2Transport};
pub use tunnel::{ProxyBridge, ProxyCommand, Tunnel};

#[cfg(feature = "ssh2")]
pub use ssh2;
