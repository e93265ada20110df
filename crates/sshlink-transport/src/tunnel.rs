//! Loopback socket bridges
//!
//! libssh2 runs a session over a real socket. Anything else that carries an
//! SSH stream (a forwarding channel through a jump host, a `ProxyCommand`
//! subprocess) is exposed on a one-shot loopback listener instead, and the
//! transport connects to that.

use crate::TransportError;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, warn};

/// A forwarding channel to a destination host, reachable on a loopback port.
///
/// Closing (or dropping) the tunnel stops the bridge and tears down the
/// session it was opened on.
///
/// The listener serves a single connection: the first local process to
/// connect to [`local_addr`](Self::local_addr) gets the forwarded stream and
/// the listener is closed. Another local user racing the intended client can
/// take the port, so the forwarded service must still authenticate its peer
/// (an SSH server does, through its host key).
#[derive(Debug)]
pub struct Tunnel {
    local_addr: SocketAddr,
    destination: (String, u16),
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Tunnel {
    /// Wrap a running bridge.
    ///
    /// `shutdown` is polled by the bridge worker; `worker` is joined on close.
    pub fn new(
        local_addr: SocketAddr,
        destination: (String, u16),
        shutdown: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            local_addr,
            destination,
            shutdown,
            worker: Mutex::new(worker),
        }
    }

    /// Loopback address the tunnel listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Host and port the tunnel forwards to
    pub fn destination(&self) -> (&str, u16) {
        (&self.destination.0, self.destination.1)
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the bridge and wait for it to finish
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(
            "Closing tunnel {} -> {}:{}",
            self.local_addr, self.destination.0, self.destination.1
        );

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("Tunnel bridge thread panicked");
            }
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// A shell command whose stdin/stdout carry the SSH stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCommand {
    command: String,
}

impl ProxyCommand {
    /// Create a proxy command. Tokens must already be expanded.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The command line
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawn the command and expose its stdio on a loopback listener.
    ///
    /// The listener accepts one connection and is closed once it has, the same
    /// first-connector rule as [`Tunnel`]. The subprocess is killed when the
    /// returned bridge is dropped.
    pub async fn spawn_bridge(&self) -> Result<ProxyBridge, TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;

        debug!("Starting proxy command: {}", self.command);
        let mut child = shell_command(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Connection(format!(
                    "Failed to start proxy command '{}': {}",
                    self.command, e
                ))
            })?;

        let (mut stdin, mut stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(TransportError::Connection(
                    "Proxy command stdio is not available".to_string(),
                ))
            }
        };

        let command = self.command.clone();
        let task = tokio::spawn(async move {
            let stream = match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Proxy bridge client connected from {}", peer);
                    stream
                }
                Err(e) => {
                    warn!("Proxy bridge accept failed: {}", e);
                    return;
                }
            };
            drop(listener);
            let (mut reader, mut writer) = stream.into_split();

            let upstream = async {
                let copied = tokio::io::copy(&mut reader, &mut stdin).await;
                let _ = stdin.shutdown().await;
                copied
            };
            let downstream = async {
                let copied = tokio::io::copy(&mut stdout, &mut writer).await;
                let _ = writer.shutdown().await;
                copied
            };
            let (up, down) = tokio::join!(upstream, downstream);
            debug!(
                "Proxy command '{}' finished (sent: {:?}, received: {:?})",
                command, up, down
            );

            if let Err(e) = child.kill().await {
                debug!("Proxy command already exited: {}", e);
            }
        });

        Ok(ProxyBridge { local_addr, task })
    }
}

/// Running [`ProxyCommand`] bridge
#[derive(Debug)]
pub struct ProxyBridge {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ProxyBridge {
    /// Loopback address to connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ProxyBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
