//! Connect, run, disconnect helper
//!
//! ```no_run
//! use sshlink::{ssh_connect, ConnectConfig};
//!
//! # async fn demo() -> sshlink::Result<()> {
//! let config = ConnectConfig::from_ssh_config("example.com")?;
//! let listing = ssh_connect(&config, |ssh| {
//!     Box::pin(async move { ssh.execute("ls -l").await })
//! })
//! .await?;
//! println!("{}", listing.output);
//! # Ok(())
//! # }
//! ```

use crate::{Result, Ssh};
use sshlink_transport::{ConnectConfig, Libssh2Transport, Transport};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Boxed future borrowing the client for `'a`
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs a closure against a freshly connected client and disconnects afterwards
#[derive(Debug)]
pub struct SshConnect<T: Transport = Libssh2Transport> {
    config: ConnectConfig,
    transport: T,
}

impl SshConnect<Libssh2Transport> {
    /// Helper for `config` over libssh2
    pub fn new(config: ConnectConfig) -> Self {
        Self::with_transport(config, Libssh2Transport::new())
    }
}

impl<T: Transport> SshConnect<T> {
    /// Helper for `config` over a custom transport
    pub fn with_transport(config: ConnectConfig, transport: T) -> Self {
        Self { config, transport }
    }

    /// Connect, call `f`, and disconnect whether or not `f` succeeded.
    ///
    /// Returns what `f` returned. A failure to disconnect is reported only
    /// when `f` itself succeeded.
    pub async fn run<F, R>(self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a mut Ssh<T>) -> BoxFuture<'a, Result<R>>,
    {
        let mut ssh = Ssh::with_transport(self.transport);
        ssh.connect(&self.config).await?;

        let result = f(&mut ssh).await;
        debug!("Closing connection to {}", self.config.hostname);
        match ssh.disconnect() {
            Ok(()) => result,
            Err(e) => {
                warn!("Disconnect from {} failed: {}", self.config.hostname, e);
                result.and(Err(e))
            }
        }
    }
}

/// Connect to `config` over libssh2, call `f`, and always disconnect
pub async fn ssh_connect<F, R>(config: &ConnectConfig, f: F) -> Result<R>
where
    F: for<'a> FnOnce(&'a mut Ssh) -> BoxFuture<'a, Result<R>>,
{
    SshConnect::new(config.clone()).run(f).await
}
