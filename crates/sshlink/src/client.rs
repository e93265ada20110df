//! SSH client and command execution

use crate::{Result, SshError};
use bytes::{Bytes, BytesMut};
use sshlink_transport::{
    CommandStream, ConnectConfig, ConnectionInfo, HostOptions, Libssh2Transport, Session,
    Transport, Tunnel,
};
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Result of a command run with [`Ssh::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr, interleaved in arrival order
    pub output: String,
    /// Remote exit status
    pub exit_status: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

impl From<CommandOutput> for (String, i32) {
    fn from(output: CommandOutput) -> Self {
        (output.output, output.exit_status)
    }
}

/// An SSH client holding at most one open connection.
///
/// The connection is closed by [`disconnect`](Self::disconnect), by
/// connecting again, or when the client is dropped.
pub struct Ssh<T: Transport = Libssh2Transport> {
    transport: T,
    session: Option<T::Session>,
}

impl Ssh<Libssh2Transport> {
    /// Create a client using libssh2
    pub fn new() -> Self {
        Self::with_transport(Libssh2Transport::new())
    }
}

impl Default for Ssh<Libssh2Transport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> std::fmt::Debug for Ssh<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh")
            .field("connection", &self.connection_info())
            .finish()
    }
}

impl<T: Transport> Ssh<T> {
    /// Create a client on a custom transport
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            session: None,
        }
    }

    /// Resolve `hostname` against the SSH config file at `path`
    pub fn load_ssh_config(hostname: &str, path: impl AsRef<Path>) -> Result<HostOptions> {
        Ok(sshlink_transport::load_ssh_config(hostname, path)?)
    }

    /// Connect and authenticate.
    ///
    /// An existing connection is closed first.
    pub async fn connect(&mut self, config: &ConnectConfig) -> Result<()> {
        self.disconnect()?;

        debug!("Connecting to {}:{}", config.hostname, config.port);
        let session = self
            .transport
            .connect(config)
            .await
            .map_err(|e| SshError::connection_failed(&config.hostname, e))?;

        let info = session.connection_info();
        info!(
            "Connected to {}@{}:{} (session {})",
            info.username, info.host, info.port, info.session_id
        );
        self.session = Some(session);
        Ok(())
    }

    /// Close the connection. Does nothing when not connected.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let info = session.connection_info();
            debug!("Disconnecting session {} from {}", info.session_id, info.host);
            session.disconnect()?;
        }
        Ok(())
    }

    /// Whether a connection is open
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Details of the open connection
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.session.as_ref().map(Session::connection_info)
    }

    /// The underlying transport session
    pub fn session(&self) -> Option<&T::Session> {
        self.session.as_ref()
    }

    fn connected(&self) -> Result<&T::Session> {
        self.session.as_ref().ok_or(SshError::NotConnected)
    }

    /// Run `command` and collect its output and exit status
    pub async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let stream = self.start(command, false).await?;
        let (output, exit_status) = collect(stream).await?;
        Ok(CommandOutput {
            output: decode(&output),
            exit_status,
        })
    }

    /// Run `command` and also write its complete output to `writer`
    pub async fn execute_file<W>(&self, command: &str, writer: &mut W) -> Result<CommandOutput>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let stream = self.start(command, false).await?;
        let (output, exit_status) = collect(stream).await?;
        writer.write_all(&output).await?;
        writer.flush().await?;
        Ok(CommandOutput {
            output: decode(&output),
            exit_status,
        })
    }

    /// Run `command` on a pseudo-terminal, echoing output to stdout as it arrives
    pub async fn execute_realtime(&self, command: &str) -> Result<i32> {
        let mut stdout = tokio::io::stdout();
        self.execute_realtime_to(command, &mut stdout).await
    }

    /// Run `command` on a pseudo-terminal, forwarding output to `writer` as it arrives
    pub async fn execute_realtime_to<W>(&self, command: &str, writer: &mut W) -> Result<i32>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = self.start(command, true).await?;
        while let Some(chunk) = stream.next_chunk().await {
            writer.write_all(&chunk).await?;
            writer.flush().await?;
        }
        let status = stream.exit_status().await?;
        debug!("Command exited with status {}", status);
        Ok(status)
    }

    /// Open a forwarding tunnel to `dest_host:dest_port` through the jump host in `jump`.
    ///
    /// The tunnel runs on its own session and is independent of this
    /// client's connection.
    pub async fn open_tunnel(
        &self,
        dest_host: &str,
        dest_port: u16,
        jump: &ConnectConfig,
    ) -> Result<Tunnel> {
        info!(
            "Opening tunnel to {}:{} via {}",
            dest_host, dest_port, jump.hostname
        );
        let session = self
            .transport
            .connect(jump)
            .await
            .map_err(|e| SshError::connection_failed(&jump.hostname, e))?;

        let tunnel = session
            .open_tunnel(dest_host, dest_port)
            .await
            .map_err(|e| {
                SshError::Channel(format!(
                    "Transport channel for '{}' failed with: {}",
                    dest_host, e
                ))
            })?;
        debug!("Tunnel listening on {}", tunnel.local_addr());
        Ok(tunnel)
    }

    /// Open an SFTP session on the current connection
    pub async fn open_sftp(&self) -> Result<<T::Session as Session>::Sftp> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| SshError::Sftp("SSH connection is not established".to_string()))?;
        Ok(session.open_sftp().await?)
    }

    async fn start(&self, command: &str, pty: bool) -> Result<CommandStream> {
        let session = self.connected()?;
        debug!("Executing '{}' (pty: {})", command, pty);
        Ok(session.exec(command, pty).await?)
    }
}

impl<T: Transport> Drop for Ssh<T> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Error while disconnecting: {}", e);
        }
    }
}

async fn collect(mut stream: CommandStream) -> Result<(Bytes, i32)> {
    let mut output = BytesMut::new();
    while let Some(chunk) = stream.next_chunk().await {
        output.extend_from_slice(&chunk);
    }
    let status = stream.exit_status().await?;
    Ok((output.freeze(), status))
}

fn decode(output: &[u8]) -> String {
    String::from_utf8_lossy(output).into_owned()
}

#[cfg(test)]
mod tests;
