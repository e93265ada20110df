//! Scoped connection guards
//!
//! [`SshContext`] owns a connected [`Ssh`] client and disconnects it when
//! closed or dropped. [`SshTunnelContext`] does the same for a client whose
//! connection runs through a tunnel opened on a jump host; the target is
//! disconnected before the tunnel is torn down.

use crate::{Result, Ssh, SshError};
use sshlink_transport::{ConnectConfig, Libssh2Transport, Sock, Transport, Tunnel};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, warn};

/// A connected client that disconnects when closed or dropped
#[derive(Debug)]
pub struct SshContext<T: Transport = Libssh2Transport> {
    ssh: Ssh<T>,
}

impl SshContext<Libssh2Transport> {
    /// Connect to `config` over libssh2
    pub async fn connect(config: &ConnectConfig) -> Result<Self> {
        Self::connect_with(Libssh2Transport::new(), config).await
    }
}

impl<T: Transport> SshContext<T> {
    /// Connect to `config` over a custom transport
    pub async fn connect_with(transport: T, config: &ConnectConfig) -> Result<Self> {
        let mut ssh = Ssh::with_transport(transport);
        ssh.connect(config).await.map_err(|e| {
            SshError::context(
                format!("Unable to open SSH context for '{}'", config.hostname),
                e,
            )
        })?;
        Ok(Self { ssh })
    }

    /// Disconnect now instead of on drop
    pub fn close(mut self) -> Result<()> {
        self.ssh.disconnect()
    }
}

impl<T: Transport> Deref for SshContext<T> {
    type Target = Ssh<T>;

    fn deref(&self) -> &Ssh<T> {
        &self.ssh
    }
}

impl<T: Transport> DerefMut for SshContext<T> {
    fn deref_mut(&mut self) -> &mut Ssh<T> {
        &mut self.ssh
    }
}

/// A client connected through a tunnel on a jump host
#[derive(Debug)]
pub struct SshTunnelContext<T: Transport = Libssh2Transport> {
    ssh: Ssh<T>,
    tunnel: Option<Arc<Tunnel>>,
}

impl SshTunnelContext<Libssh2Transport> {
    /// Tunnel through `jump` to the target's `hostname:port` and connect to it over libssh2
    pub async fn connect(jump: &ConnectConfig, target: &ConnectConfig) -> Result<Self> {
        Self::connect_with(Libssh2Transport::new(), jump, target).await
    }
}

impl<T: Transport> SshTunnelContext<T> {
    /// Tunnel through `jump` to the target and connect over a custom transport
    pub async fn connect_with(
        transport: T,
        jump: &ConnectConfig,
        target: &ConnectConfig,
    ) -> Result<Self> {
        let ssh = Ssh::with_transport(transport);
        let tunnel = ssh
            .open_tunnel(&target.hostname, target.port, jump)
            .await
            .map_err(|e| {
                SshError::context(
                    format!(
                        "Unable to open tunnel to '{}' via '{}'",
                        target.hostname, jump.hostname
                    ),
                    e,
                )
            })?;
        let tunnel = Arc::new(tunnel);

        let mut over_tunnel = target.clone();
        over_tunnel.sock = Some(Sock::Tunnel(Arc::clone(&tunnel)));

        let mut context = Self {
            ssh,
            tunnel: Some(tunnel),
        };
        context.ssh.connect(&over_tunnel).await.map_err(|e| {
            SshError::context(
                format!(
                    "Unable to open SSH context for '{}' via '{}'",
                    target.hostname, jump.hostname
                ),
                e,
            )
        })?;
        Ok(context)
    }

    /// The tunnel the connection runs through
    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.tunnel.as_deref()
    }

    /// Disconnect the target, then close the tunnel
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let disconnected = self.ssh.disconnect();
        if let Some(tunnel) = self.tunnel.take() {
            debug!(
                "Closing tunnel to {}:{}",
                tunnel.destination().0,
                tunnel.destination().1
            );
            tunnel.close();
        }
        disconnected
    }
}

impl<T: Transport> Deref for SshTunnelContext<T> {
    type Target = Ssh<T>;

    fn deref(&self) -> &Ssh<T> {
        &self.ssh
    }
}

impl<T: Transport> DerefMut for SshTunnelContext<T> {
    fn deref_mut(&mut self) -> &mut Ssh<T> {
        &mut self.ssh
    }
}

impl<T: Transport> Drop for SshTunnelContext<T> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Error while closing tunnel context: {}", e);
        }
    }
}
