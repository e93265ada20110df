//! Transport abstraction and the libssh2 implementation

use crate::{ConnectConfig, TransportError, Tunnel};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opens authenticated sessions to SSH servers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Session type produced by this transport
    type Session: Session;

    /// Connect and authenticate using `config`
    async fn connect(&self, config: &ConnectConfig) -> Result<Self::Session, TransportError>;
}

/// An authenticated SSH session
#[async_trait]
pub trait Session: Send + Sync + Sized {
    /// SFTP client handed back to callers unmodified
    type Sftp: Send;

    /// Start `command`, optionally on a pseudo-terminal
    async fn exec(&self, command: &str, pty: bool) -> Result<CommandStream, TransportError>;

    /// Turn this session into a forwarding tunnel to `host:port`
    async fn open_tunnel(self, host: &str, port: u16) -> Result<Tunnel, TransportError>;

    /// Open an SFTP session
    async fn open_sftp(&self) -> Result<Self::Sftp, TransportError>;

    /// Close the session
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;
}

/// Connection information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identifier used in log output
    pub session_id: Uuid,
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Authenticated username
    pub username: String,
    /// Connection type
    pub transport_type: TransportType,
}

/// Transport type enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportType {
    /// SSH with libssh2
    SshLibssh2,
    /// In-process (for testing)
    Local,
}

/// Output of a running remote command.
///
/// Chunks arrive in the order the server sent them, with stdout and stderr
/// interleaved. The exit status is available once the stream is drained.
#[derive(Debug)]
pub struct CommandStream {
    output: mpsc::Receiver<Bytes>,
    status: JoinHandle<Result<i32, TransportError>>,
}

impl CommandStream {
    /// Assemble a stream from an output channel and the task reporting the exit status
    pub fn new(
        output: mpsc::Receiver<Bytes>,
        status: JoinHandle<Result<i32, TransportError>>,
    ) -> Self {
        Self { output, status }
    }

    /// Next chunk of output, `None` once the command's output is closed
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.output.recv().await
    }

    /// Wait for the command to finish and return its exit status.
    ///
    /// Output not yet read is discarded. A command whose output is abandoned
    /// before it finishes is closed and reports a channel error.
    pub async fn exit_status(self) -> Result<i32, TransportError> {
        drop(self.output);
        self.status.await?
    }
}

#[cfg(feature = "ssh2")]
pub use libssh2::{Libssh2Session, Libssh2Transport};

#[cfg(feature = "ssh2")]
mod libssh2 {
    use super::*;
    use crate::config::{HostKeyPolicy, Sock};
    use crate::ssh_config::expand_tilde;
    use crate::tunnel::ProxyBridge;
    use ssh2::{CheckResult, ExtendedData, KnownHostFileKind, MethodType};
    use std::collections::BTreeMap;
    use std::io::{self, Read, Write};
    use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tracing::{debug, info, warn};

    /// Identity files tried when `look_for_keys` is set
    const DEFAULT_IDENTITIES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

    /// Bridge poll interval when neither side has data
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    const READ_BUFFER: usize = 32 * 1024;

    /// Session timeout while a command's output is being read
    const READ_POLL_MS: u32 = 250;

    /// Output chunks buffered between the reader thread and the consumer
    const OUTPUT_QUEUE: usize = 64;

    /// [`Transport`] backed by the `ssh2` crate
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Libssh2Transport;

    impl Libssh2Transport {
        /// Create a new libssh2 transport
        pub fn new() -> Self {
            Self
        }
    }

    /// Where the TCP stream for a session comes from
    enum Endpoint {
        Remote(String, u16),
        Loopback(SocketAddr),
    }

    #[async_trait]
    impl Transport for Libssh2Transport {
        type Session = Libssh2Session;

        async fn connect(&self, config: &ConnectConfig) -> Result<Libssh2Session, TransportError> {
            let username = config.effective_username();
            info!("Connecting to {}@{}:{}", username, config.hostname, config.port);
            warn_unsupported(config);

            let mut proxy = None;
            let mut tunnel = None;
            let endpoint = match &config.sock {
                None => Endpoint::Remote(config.hostname.clone(), config.port),
                Some(Sock::ProxyCommand(command)) => {
                    let bridge = command.spawn_bridge().await?;
                    let addr = bridge.local_addr();
                    proxy = Some(bridge);
                    Endpoint::Loopback(addr)
                }
                Some(Sock::Tunnel(t)) => {
                    if t.is_closed() {
                        return Err(TransportError::Connection(format!(
                            "Tunnel to {}:{} is closed",
                            t.destination().0,
                            t.destination().1
                        )));
                    }
                    tunnel = Some(Arc::clone(t));
                    Endpoint::Loopback(t.local_addr())
                }
            };

            let blocking_config = config.clone();
            let session =
                tokio::task::spawn_blocking(move || establish(&blocking_config, endpoint)).await??;

            let info = ConnectionInfo {
                session_id: Uuid::new_v4(),
                host: config.hostname.clone(),
                port: config.port,
                username,
                transport_type: TransportType::SshLibssh2,
            };
            info!("Session {} established to {}:{}", info.session_id, info.host, info.port);

            Ok(Libssh2Session {
                session,
                info,
                _proxy: proxy,
                _tunnel: tunnel,
            })
        }
    }

    /// Session backed by `ssh2::Session`
    pub struct Libssh2Session {
        session: ssh2::Session,
        info: ConnectionInfo,
        // Kept alive for as long as the session runs over them.
        _proxy: Option<ProxyBridge>,
        _tunnel: Option<Arc<Tunnel>>,
    }

    impl std::fmt::Debug for Libssh2Session {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Libssh2Session")
                .field("info", &self.info)
                .field("proxied", &self._proxy.is_some())
                .field("tunneled", &self._tunnel.is_some())
                .finish()
        }
    }

    impl Libssh2Session {
        /// The underlying `ssh2` session
        pub fn raw(&self) -> &ssh2::Session {
            &self.session
        }
    }

    #[async_trait]
    impl Session for Libssh2Session {
        type Sftp = ssh2::Sftp;

        async fn exec(&self, command: &str, pty: bool) -> Result<CommandStream, TransportError> {
            debug!("[{}] exec (pty: {}): {}", self.info.session_id, pty, command);

            let session = self.session.clone();
            let command = command.to_string();
            let open = move || -> Result<ssh2::Channel, TransportError> {
                let mut channel = session.channel_session().map_err(|e| {
                    TransportError::Channel(format!("Failed to open session channel: {}", e))
                })?;
                if pty {
                    channel.request_pty("vt100", None, None)?;
                } else {
                    channel.handle_extended_data(ExtendedData::Merge)?;
                }
                channel.exec(&command)?;
                channel.send_eof()?;
                Ok(channel)
            };
            let mut channel = tokio::task::spawn_blocking(open).await??;

            let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
            let session = self.session.clone();
            let status = tokio::task::spawn_blocking(move || -> Result<i32, TransportError> {
                // Reads wake up periodically so an abandoned command releases the session.
                session.set_timeout(READ_POLL_MS);
                let forwarded = forward_output(&mut channel, &tx);
                drop(tx);

                match forwarded {
                    Ok(Forwarded::Complete) => {
                        session.set_timeout(0);
                        channel.wait_close()?;
                        Ok(channel.exit_status()?)
                    }
                    Ok(Forwarded::Abandoned) => {
                        debug!("Output receiver closed, closing channel");
                        let closed = channel.close();
                        session.set_timeout(0);
                        closed?;
                        Err(TransportError::Channel(
                            "Command output was abandoned before the command finished".to_string(),
                        ))
                    }
                    Err(e) => {
                        session.set_timeout(0);
                        Err(e.into())
                    }
                }
            });

            Ok(CommandStream::new(rx, status))
        }

        async fn open_tunnel(self, host: &str, port: u16) -> Result<Tunnel, TransportError> {
            debug!(
                "[{}] Opening direct-tcpip channel to {}:{}",
                self.info.session_id, host, port
            );
            let destination = (host.to_string(), port);
            tokio::task::spawn_blocking(move || spawn_channel_bridge(self, destination)).await?
        }

        async fn open_sftp(&self) -> Result<ssh2::Sftp, TransportError> {
            let session = self.session.clone();
            tokio::task::spawn_blocking(move || session.sftp())
                .await?
                .map_err(|e| TransportError::Sftp(e.to_string()))
        }

        fn disconnect(&self) -> Result<(), TransportError> {
            debug!("[{}] Disconnecting from {}", self.info.session_id, self.info.host);
            self.session.disconnect(None, "closed by client", None)?;
            Ok(())
        }

        fn connection_info(&self) -> ConnectionInfo {
            self.info.clone()
        }
    }

    /// How [`forward_output`] ended
    #[derive(Debug, PartialEq, Eq)]
    enum Forwarded {
        /// The command's output reached EOF
        Complete,
        /// The receiver went away first
        Abandoned,
    }

    /// Copy `reader` into `tx` until EOF or until nobody is listening.
    ///
    /// Timeouts from the reader are treated as a chance to notice a closed
    /// receiver; the read is retried otherwise.
    fn forward_output<R: Read>(reader: &mut R, tx: &mpsc::Sender<Bytes>) -> io::Result<Forwarded> {
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(Forwarded::Complete),
                Ok(n) => {
                    if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        return Ok(Forwarded::Abandoned);
                    }
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    if tx.is_closed() {
                        return Ok(Forwarded::Abandoned);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn warn_unsupported(config: &ConnectConfig) {
        if config.gss_auth || config.gss_kex {
            warn!("GSS-API authentication/key exchange is not supported by libssh2; ignoring");
        }
    }

    /// TCP connect, handshake, host key check and authentication
    fn establish(
        config: &ConnectConfig,
        endpoint: Endpoint,
    ) -> Result<ssh2::Session, TransportError> {
        let tcp = open_tcp(&endpoint, config.timeout)?;

        let mut session = ssh2::Session::new()?;
        session.set_compress(config.compress);
        apply_disabled_algorithms(&session, &config.disabled_algorithms)?;
        session.set_tcp_stream(tcp);

        session.set_timeout(timeout_ms(config.banner_timeout));
        session
            .handshake()
            .map_err(|e| TransportError::Connection(format!("SSH handshake failed: {}", e)))?;

        verify_host_key(&session, config)?;

        session.set_timeout(timeout_ms(config.auth_timeout));
        authenticate(&session, config)?;
        session.set_timeout(0);

        Ok(session)
    }

    fn timeout_ms(timeout: Option<Duration>) -> u32 {
        timeout
            .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    fn open_tcp(
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<TcpStream, TransportError> {
        match endpoint {
            Endpoint::Loopback(addr) => Ok(TcpStream::connect(addr)?),
            Endpoint::Remote(host, port) => {
                let addrs: Vec<SocketAddr> = (host.as_str(), *port)
                    .to_socket_addrs()
                    .map_err(|e| {
                        TransportError::Connection(format!("Failed to resolve {}: {}", host, e))
                    })?
                    .collect();

                let mut last_error = None;
                for addr in addrs {
                    let attempt = match timeout {
                        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                        None => TcpStream::connect(addr),
                    };
                    match attempt {
                        Ok(stream) => return Ok(stream),
                        Err(e) => {
                            debug!("Connection to {} failed: {}", addr, e);
                            last_error = Some(e);
                        }
                    }
                }

                Err(match last_error {
                    Some(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::Timeout,
                    Some(e) => TransportError::Io(e),
                    None => TransportError::Connection(format!("No addresses found for {}", host)),
                })
            }
        }
    }

    fn apply_disabled_algorithms(
        session: &ssh2::Session,
        disabled: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), TransportError> {
        for (group, algorithms) in disabled {
            let methods: &[MethodType] = match group.as_str() {
                "kex" => &[MethodType::Kex],
                "keys" => &[MethodType::HostKey],
                "ciphers" => &[MethodType::CryptCs, MethodType::CryptSc],
                "macs" => &[MethodType::MacCs, MethodType::MacSc],
                other => {
                    warn!("Ignoring unsupported disabled_algorithms group '{}'", other);
                    continue;
                }
            };

            for &method in methods {
                let remaining: Vec<&str> = session
                    .supported_algs(method)?
                    .into_iter()
                    .filter(|alg| !algorithms.iter().any(|d| d == *alg))
                    .collect();
                if remaining.is_empty() {
                    return Err(TransportError::Configuration(format!(
                        "Every '{}' algorithm is disabled",
                        group
                    )));
                }
                session.method_pref(method, &remaining.join(","))?;
            }
        }
        Ok(())
    }

    fn known_hosts_entry(host: &str, port: u16) -> String {
        if port == crate::SSH_PORT {
            host.to_string()
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    fn verify_host_key(
        session: &ssh2::Session,
        config: &ConnectConfig,
    ) -> Result<(), TransportError> {
        let (key, key_type) = session.host_key().ok_or_else(|| {
            TransportError::HostKey("Server did not present a host key".to_string())
        })?;

        let mut known_hosts = session.known_hosts()?;
        let file: Option<PathBuf> = config
            .host_key_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")));

        if let Some(path) = file.as_deref().filter(|p| p.exists()) {
            known_hosts
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    TransportError::HostKey(format!("Failed to read {}: {}", path.display(), e))
                })?;
        }

        let host = &config.hostname;
        let check = known_hosts.check_port(host, config.port, key);
        match host_key_decision(check, config.host_key_policy, host)? {
            HostKeyAction::Accept => Ok(()),
            HostKeyAction::Add => {
                info!("Adding host key for '{}'", host);
                known_hosts.add(
                    &known_hosts_entry(host, config.port),
                    key,
                    "added by sshlink",
                    key_type.into(),
                )?;
                if let Some(path) = &config.host_key_file {
                    known_hosts.write_file(path, KnownHostFileKind::OpenSSH)?;
                }
                Ok(())
            }
        }
    }

    /// What to do with a host key that passed [`host_key_decision`]
    #[derive(Debug, PartialEq, Eq)]
    enum HostKeyAction {
        Accept,
        Add,
    }

    /// Apply `policy` to a known hosts lookup. A changed key is refused under every policy.
    fn host_key_decision(
        check: CheckResult,
        policy: HostKeyPolicy,
        host: &str,
    ) -> Result<HostKeyAction, TransportError> {
        match check {
            CheckResult::Match => Ok(HostKeyAction::Accept),
            CheckResult::Mismatch => Err(TransportError::HostKey(format!(
                "Host key for '{}' does not match the known hosts entry",
                host
            ))),
            CheckResult::Failure => Err(TransportError::HostKey(format!(
                "Unable to check the host key for '{}'",
                host
            ))),
            CheckResult::NotFound => match policy {
                HostKeyPolicy::Reject => Err(TransportError::HostKey(format!(
                    "Server '{}' not found in known hosts",
                    host
                ))),
                HostKeyPolicy::Warning => {
                    warn!("Unknown host key for '{}', continuing", host);
                    Ok(HostKeyAction::Accept)
                }
                HostKeyPolicy::AutoAdd => Ok(HostKeyAction::Add),
            },
        }
    }

    /// Try key files, the agent, default identities, then the password
    fn authenticate(session: &ssh2::Session, config: &ConnectConfig) -> Result<(), TransportError> {
        let username = config.effective_username();
        let passphrase = config.passphrase.as_deref();
        let mut failures: Vec<String> = Vec::new();

        let try_key = |path: &Path, failures: &mut Vec<String>| -> bool {
            match session.userauth_pubkey_file(&username, None, path, passphrase) {
                Ok(()) if session.authenticated() => {
                    debug!("Authenticated with key {}", path.display());
                    true
                }
                Ok(()) => false,
                Err(e) => {
                    failures.push(format!("key {}: {}", path.display(), e));
                    false
                }
            }
        };

        for key in &config.key_filename {
            if try_key(&expand_tilde(key), &mut failures) {
                return Ok(());
            }
        }

        if config.allow_agent {
            match session.userauth_agent(&username) {
                Ok(()) if session.authenticated() => {
                    debug!("Authenticated with SSH agent");
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => failures.push(format!("agent: {}", e)),
            }
        }

        if config.look_for_keys {
            if let Some(ssh_dir) = dirs::home_dir().map(|home| home.join(".ssh")) {
                for name in DEFAULT_IDENTITIES {
                    let path = ssh_dir.join(name);
                    if path.exists() && try_key(&path, &mut failures) {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(password) = &config.password {
            match session.userauth_password(&username, password) {
                Ok(()) if session.authenticated() => {
                    debug!("Authenticated with password");
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => failures.push(format!("password: {}", e)),
            }
        }

        let detail = if failures.is_empty() {
            "no authentication methods available".to_string()
        } else {
            failures.join("; ")
        };
        Err(TransportError::Authentication(format!("{}@{}: {}", username, config.hostname, detail)))
    }

    /// Open the forwarding channel and pump it through a loopback socket.
    ///
    /// Runs on a blocking thread; the pump itself runs on a dedicated thread
    /// that owns the jump session.
    fn spawn_channel_bridge(
        jump: Libssh2Session,
        destination: (String, u16),
    ) -> Result<Tunnel, TransportError> {
        let origin = (jump.info.host.clone(), jump.info.port);
        let channel = jump
            .session
            .channel_direct_tcpip(
                &destination.0,
                destination.1,
                Some((origin.0.as_str(), origin.1)),
            )
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let label = format!("{}:{}", destination.0, destination.1);

        let worker = thread::Builder::new()
            .name("sshlink-tunnel".to_string())
            .spawn(move || {
                if let Err(e) = pump(&jump, channel, listener, &flag) {
                    warn!("Tunnel to {} failed: {}", label, e);
                }
                jump.session.set_blocking(true);
                if let Err(e) = jump.disconnect() {
                    debug!("Jump session disconnect failed: {}", e);
                }
                debug!("Tunnel to {} closed", label);
            })?;

        info!("Tunnel {} -> {}:{} ready", local_addr, destination.0, destination.1);
        Ok(Tunnel::new(local_addr, destination, shutdown, Some(worker)))
    }

    fn pump(
        jump: &Libssh2Session,
        mut channel: ssh2::Channel,
        listener: TcpListener,
        shutdown: &AtomicBool,
    ) -> io::Result<()> {
        let mut stream = loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Tunnel client connected from {}", peer);
                    break stream;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(e),
            }
        };
        drop(listener);

        stream.set_nonblocking(true)?;
        jump.session.set_blocking(false);

        let mut buf = vec![0u8; READ_BUFFER];
        while !shutdown.load(Ordering::SeqCst) {
            let mut idle = true;

            match channel.read(&mut buf) {
                Ok(0) if channel.eof() => break,
                Ok(0) => {}
                Ok(n) => {
                    idle = false;
                    write_all_nonblocking(&mut stream, &buf[..n], shutdown)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    idle = false;
                    write_all_nonblocking(&mut channel, &buf[..n], shutdown)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if idle {
                thread::sleep(POLL_INTERVAL);
            }
        }

        jump.session.set_blocking(true);
        let _ = channel.send_eof();
        let _ = channel.close();
        Ok(())
    }

    fn write_all_nonblocking<W: Write>(
        writer: &mut W,
        mut data: &[u8],
        shutdown: &AtomicBool,
    ) -> io::Result<()> {
        while !data.is_empty() {
            match writer.write(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if shutdown.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
        writer.flush().or_else(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                Ok(())
            } else {
                Err(e)
            }
        })
    }

}
