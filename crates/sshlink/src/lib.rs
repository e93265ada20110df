//! # sshlink
//!
//! Open an SSH connection, run commands and reach SFTP with as little
//! ceremony as possible. Connection handling, authentication and channels
//! are delegated to libssh2 through the `ssh2` crate; this crate adds SSH
//! config file lookup and three call conventions:
//!
//! - direct use of [`Ssh`]
//! - [`ssh_connect`] / [`SshConnect`], which connect, run a closure, and
//!   always disconnect
//! - [`SshContext`] / [`SshTunnelContext`], scoped guards that disconnect
//!   when closed or dropped
//!
//! ```no_run
//! use sshlink::{ConnectConfig, Ssh};
//!
//! # async fn demo() -> sshlink::Result<()> {
//! let config = ConnectConfig::from_ssh_config("example.com")?;
//! let mut ssh = Ssh::new();
//! ssh.connect(&config).await?;
//! let output = ssh.execute("ls -l").await?;
//! println!("{} (exit {})", output.output, output.exit_status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use sshlink_transport as transport;

/// Error types for the sshlink library
pub mod error;

/// SSH client and command execution
pub mod client;

/// Connect, run, disconnect helper
pub mod connect;

/// Scoped connection guards
pub mod context;

pub use client::{CommandOutput, Ssh};
pub use connect::{ssh_connect, BoxFuture, SshConnect};
pub use context::{SshContext, SshTunnelContext};
pub use error::SshError;

pub use sshlink_transport::{
    ConnectConfig, ConnectConfigBuilder, HostKeyPolicy, HostOptions, Libssh2Transport,
    ProxyCommand, Sock, Tunnel, DEFAULT_SSH_CONFIG, SSH_PORT,
};

/// Result type alias for sshlink operations
pub type Result<T> = std::result::Result<T, SshError>;
