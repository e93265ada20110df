//! Recording transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use sshlink::transport::{
    CommandStream, ConnectionInfo, Session, Transport, TransportError, TransportType,
};
use sshlink::{ConnectConfig, Sock, Tunnel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Ordered log of everything the transport was asked to do
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Transport that scripts command output and records calls
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    pub log: EventLog,
    outputs: Arc<Mutex<HashMap<String, (String, i32)>>>,
    refuse: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` print `output` and exit with `status`
    pub fn script(&self, command: &str, output: &str, status: i32) {
        self.outputs
            .lock()
            .unwrap()
            .insert(command.to_string(), (output.to_string(), status));
    }

    /// Refuse connections to `host`
    pub fn refuse(&self, host: &str) {
        self.refuse.lock().unwrap().push(host.to_string());
    }
}

pub struct RecordingSession {
    log: EventLog,
    outputs: Arc<Mutex<HashMap<String, (String, i32)>>>,
    info: ConnectionInfo,
}

#[async_trait]
impl Transport for RecordingTransport {
    type Session = RecordingSession;

    async fn connect(&self, config: &ConnectConfig) -> Result<RecordingSession, TransportError> {
        let route = match &config.sock {
            Some(Sock::Tunnel(tunnel)) => format!(" via {}", tunnel.local_addr()),
            Some(Sock::ProxyCommand(proxy)) => format!(" via '{}'", proxy.command()),
            None => String::new(),
        };
        if self.refuse.lock().unwrap().contains(&config.hostname) {
            self.log.push(format!("refused {}", config.hostname));
            return Err(TransportError::Connection("Connection refused".to_string()));
        }
        self.log.push(format!("connect {}{}", config.hostname, route));

        Ok(RecordingSession {
            log: self.log.clone(),
            outputs: Arc::clone(&self.outputs),
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
impl Session for RecordingSession {
    type Sftp = String;

    async fn exec(&self, command: &str, _pty: bool) -> Result<CommandStream, TransportError> {
        self.log.push(format!("exec {} on {}", command, self.info.host));
        let (output, status) = self
            .outputs
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| (String::new(), 127));

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            if !output.is_empty() {
                let _ = tx.send(Bytes::from(output)).await;
            }
            Ok(status)
        });
        Ok(CommandStream::new(rx, task))
    }

    async fn open_tunnel(self, host: &str, port: u16) -> Result<Tunnel, TransportError> {
        self.log
            .push(format!("tunnel {}:{} via {}", host, port, self.info.host));

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let log = self.log.clone();
        let jump = self.info.host.clone();
        let worker = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            log.push(format!("tunnel closed via {}", jump));
        });

        Ok(Tunnel::new(
            "127.0.0.1:40022".parse().unwrap(),
            (host.to_string(), port),
            shutdown,
            Some(worker),
        ))
    }

    async fn open_sftp(&self) -> Result<String, TransportError> {
        Ok(format!("sftp {}", self.info.host))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.log.push(format!("disconnect {}", self.info.host));
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }
}

pub fn config(host: &str) -> ConnectConfig {
    let mut config = ConnectConfig::new(host);
    config.username = Some("deploy".to_string());
    config
}
