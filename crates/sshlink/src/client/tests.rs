//! Unit tests for the SSH client

use super::*;
use async_trait::async_trait;
use sshlink_transport::{TransportError, TransportType};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MockState {
    /// Scripted output chunks and exit status per command
    commands: HashMap<String, (Vec<Bytes>, i32)>,
    connected_hosts: Vec<String>,
    executed: Vec<(String, bool)>,
    disconnects: usize,
    connect_error: Option<fn() -> TransportError>,
    tunnel_error: Option<fn() -> TransportError>,
}

#[derive(Debug, Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn script(&self, command: &str, chunks: &[&'static str], status: i32) {
        let chunks = chunks.iter().map(|&c| Bytes::from_static(c.as_bytes())).collect();
        self.script_bytes(command, chunks, status);
    }

    fn script_bytes(&self, command: &str, chunks: Vec<Bytes>, status: i32) {
        self.state
            .lock()
            .unwrap()
            .commands
            .insert(command.to_string(), (chunks, status));
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    info: ConnectionInfo,
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(
        &self,
        config: &ConnectConfig,
    ) -> std::result::Result<MockSession, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(make_error) = state.connect_error {
            return Err(make_error());
        }
        state.connected_hosts.push(config.hostname.clone());
        Ok(MockSession {
            state: Arc::clone(&self.state),
            info: ConnectionInfo {
                session_id: Uuid::new_v4(),
                host: config.hostname.clone(),
                port: config.port,
                username: config.effective_username(),
                transport_type: TransportType::Local,
            },
        })
    }
}

#[async_trait]
impl Session for MockSession {
    type Sftp = String;

    async fn exec(
        &self,
        command: &str,
        pty: bool,
    ) -> std::result::Result<CommandStream, TransportError> {
        let (chunks, status) = {
            let mut state = self.state.lock().unwrap();
            state.executed.push((command.to_string(), pty));
            state
                .commands
                .get(command)
                .cloned()
                .ok_or_else(|| TransportError::Channel(format!("unknown command '{}'", command)))?
        };

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Ok(status)
        });
        Ok(CommandStream::new(rx, task))
    }

    async fn open_tunnel(
        self,
        host: &str,
        port: u16,
    ) -> std::result::Result<Tunnel, TransportError> {
        if let Some(make_error) = self.state.lock().unwrap().tunnel_error {
            return Err(make_error());
        }
        Ok(Tunnel::new(
            "127.0.0.1:40022".parse().unwrap(),
            (host.to_string(), port),
            Arc::new(AtomicBool::new(false)),
            None,
        ))
    }

    async fn open_sftp(&self) -> std::result::Result<String, TransportError> {
        Ok(format!("sftp://{}", self.info.host))
    }

    fn disconnect(&self) -> std::result::Result<(), TransportError> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }
}

fn refused() -> TransportError {
    TransportError::Connection("Connection refused".to_string())
}

fn rejected() -> TransportError {
    TransportError::Authentication("no methods left".to_string())
}

fn prohibited() -> TransportError {
    TransportError::Channel("administratively prohibited".to_string())
}

fn config(host: &str) -> ConnectConfig {
    let mut config = ConnectConfig::new(host);
    config.username = Some("deploy".to_string());
    config
}

async fn connected_client() -> (Ssh<MockTransport>, MockTransport) {
    let transport = MockTransport::default();
    let mut ssh = Ssh::with_transport(transport.clone());
    ssh.connect(&config("web01")).await.unwrap();
    (ssh, transport)
}

#[tokio::test]
async fn test_connect_records_connection_info() {
    let (ssh, transport) = connected_client().await;

    assert!(ssh.is_connected());
    let info = ssh.connection_info().unwrap();
    assert_eq!(info.host, "web01");
    assert_eq!(info.port, 22);
    assert_eq!(info.username, "deploy");
    assert_eq!(transport.state.lock().unwrap().connected_hosts, vec!["web01"]);
}

#[tokio::test]
async fn test_connect_failure_is_wrapped() {
    let transport = MockTransport::default();
    transport.state.lock().unwrap().connect_error = Some(refused);
    let mut ssh = Ssh::with_transport(transport);

    let err = ssh.connect(&config("web01")).await.unwrap_err();
    assert!(matches!(err, SshError::Connection(_)));
    assert!(err
        .to_string()
        .starts_with("Connection to 'web01' failed with error:"));
    assert!(!ssh.is_connected());
}

#[tokio::test]
async fn test_connect_auth_failure_keeps_variant() {
    let transport = MockTransport::default();
    transport.state.lock().unwrap().connect_error = Some(rejected);
    let mut ssh = Ssh::with_transport(transport);

    let err = ssh.connect(&config("web01")).await.unwrap_err();
    assert!(matches!(err, SshError::Authentication(_)));
}

#[tokio::test]
async fn test_reconnect_closes_previous_session() {
    let (mut ssh, transport) = connected_client().await;
    ssh.connect(&config("web02")).await.unwrap();

    let state = transport.state.lock().unwrap();
    assert_eq!(state.disconnects, 1);
    assert_eq!(state.connected_hosts, vec!["web01", "web02"]);
    drop(state);
    assert_eq!(ssh.connection_info().unwrap().host, "web02");
}

#[tokio::test]
async fn test_disconnect_is_noop_when_not_connected() {
    let transport = MockTransport::default();
    let mut ssh = Ssh::with_transport(transport.clone());

    ssh.disconnect().unwrap();
    ssh.disconnect().unwrap();
    assert_eq!(transport.state.lock().unwrap().disconnects, 0);
}

#[tokio::test]
async fn test_drop_disconnects() {
    let (ssh, transport) = connected_client().await;
    drop(ssh);
    assert_eq!(transport.state.lock().unwrap().disconnects, 1);
}

#[tokio::test]
async fn test_execute_collects_output_and_status() {
    let (ssh, transport) = connected_client().await;
    transport.script("ls -l", &["total 0\n", "drwxr-xr-x etc\n"], 0);

    let result = ssh.execute("ls -l").await.unwrap();
    assert_eq!(result.output, "total 0\ndrwxr-xr-x etc\n");
    assert_eq!(result.exit_status, 0);
    assert!(result.success());
    assert_eq!(
        transport.state.lock().unwrap().executed,
        vec![("ls -l".to_string(), false)]
    );
}

#[tokio::test]
async fn test_execute_does_not_leak_output_between_calls() {
    let (ssh, transport) = connected_client().await;
    transport.script("echo one", &["one\n"], 0);
    transport.script("false", &[], 1);

    assert_eq!(ssh.execute("echo one").await.unwrap().output, "one\n");

    let second = ssh.execute("false").await.unwrap();
    assert_eq!(second.output, "");
    assert_eq!(second.exit_status, 1);
    assert!(!second.success());
}

#[tokio::test]
async fn test_execute_decodes_invalid_utf8_lossily() {
    let (ssh, transport) = connected_client().await;
    transport.script_bytes("cat blob", vec![Bytes::from_static(b"ok \xff\n")], 0);

    let result = ssh.execute("cat blob").await.unwrap();
    assert_eq!(result.output, "ok \u{fffd}\n");
}

#[tokio::test]
async fn test_execute_without_connection() {
    let ssh = Ssh::with_transport(MockTransport::default());
    let err = ssh.execute("uptime").await.unwrap_err();
    assert!(matches!(err, SshError::NotConnected));
}

#[tokio::test]
async fn test_execute_unknown_command_is_channel_error() {
    let (ssh, _transport) = connected_client().await;
    let err = ssh.execute("nope").await.unwrap_err();
    assert!(matches!(err, SshError::Channel(_)));
}

#[tokio::test]
async fn test_execute_file_writes_output() {
    let (ssh, transport) = connected_client().await;
    transport.script("uname -a", &["Linux web01\n"], 0);

    let mut sink: Vec<u8> = Vec::new();
    let result = ssh.execute_file("uname -a", &mut sink).await.unwrap();
    assert_eq!(sink, b"Linux web01\n");
    assert_eq!(result.output, "Linux web01\n");
}

#[tokio::test]
async fn test_execute_realtime_uses_pty_and_streams() {
    let (ssh, transport) = connected_client().await;
    transport.script("tail -n 2 log", &["line 1\r\n", "line 2\r\n"], 3);

    let mut sink: Vec<u8> = Vec::new();
    let status = ssh
        .execute_realtime_to("tail -n 2 log", &mut sink)
        .await
        .unwrap();
    assert_eq!(status, 3);
    assert_eq!(sink, b"line 1\r\nline 2\r\n");
    assert_eq!(
        transport.state.lock().unwrap().executed,
        vec![("tail -n 2 log".to_string(), true)]
    );
}

#[tokio::test]
async fn test_command_output_into_tuple() {
    let output = CommandOutput {
        output: "hi".to_string(),
        exit_status: 2,
    };
    let (text, status): (String, i32) = output.into();
    assert_eq!(text, "hi");
    assert_eq!(status, 2);
}

#[tokio::test]
async fn test_open_tunnel_uses_jump_host() {
    let transport = MockTransport::default();
    let ssh = Ssh::with_transport(transport.clone());

    let tunnel = ssh
        .open_tunnel("db.internal", 5432, &config("bastion"))
        .await
        .unwrap();
    assert_eq!(tunnel.destination(), ("db.internal", 5432));
    assert_eq!(transport.state.lock().unwrap().connected_hosts, vec!["bastion"]);
    assert!(!ssh.is_connected());
}

#[tokio::test]
async fn test_open_tunnel_channel_failure_message() {
    let transport = MockTransport::default();
    transport.state.lock().unwrap().tunnel_error = Some(prohibited);
    let ssh = Ssh::with_transport(transport);

    let err = ssh
        .open_tunnel("db.internal", 5432, &config("bastion"))
        .await
        .unwrap_err();
    assert!(matches!(err, SshError::Channel(_)));
    assert!(err
        .to_string()
        .starts_with("Transport channel for 'db.internal' failed with:"));
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn test_open_sftp_requires_connection() {
    let ssh = Ssh::with_transport(MockTransport::default());
    let err = ssh.open_sftp().await.unwrap_err();
    assert!(matches!(err, SshError::Sftp(_)));
}

#[tokio::test]
async fn test_open_sftp_returns_session_object() {
    let (ssh, _transport) = connected_client().await;
    assert_eq!(ssh.open_sftp().await.unwrap(), "sftp://web01");
}

#[test]
fn test_load_ssh_config_forwards_lookup() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Host web\n    HostName web01.example.com\n    Port 2222").unwrap();

    let options = Ssh::<MockTransport>::load_ssh_config("web", file.path()).unwrap();
    assert_eq!(options.hostname.as_deref(), Some("web01.example.com"));
    assert_eq!(options.port, Some(2222));
}

#[test]
fn test_load_ssh_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Ssh::<MockTransport>::load_ssh_config("web", dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, SshError::Configuration(_)));
}
