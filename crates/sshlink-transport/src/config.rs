//! Connection configuration record
//!
//! [`ConnectConfig`] carries every parameter a connect call accepts, with the
//! same defaults the SSH client applies when a value is not given. It can be
//! built explicitly, overlaid from an SSH config file, assembled from a
//! string property map, or deserialized.

use crate::ssh_config::{self, parse_bool, HostOptions, SshConfigFile};
use crate::tunnel::{ProxyCommand, Tunnel};
use crate::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default SSH port
pub const SSH_PORT: u16 = 22;

/// Default location of the user's SSH client configuration
pub const DEFAULT_SSH_CONFIG: &str = "~/.ssh/config";

/// Property names accepted by [`ConnectConfig::from_properties`]
const PROPERTIES: &[&str] = &[
    "hostname",
    "port",
    "username",
    "password",
    "key_filename",
    "timeout",
    "allow_agent",
    "look_for_keys",
    "compress",
    "gss_auth",
    "gss_kex",
    "gss_deleg_creds",
    "gss_host",
    "gss_trust_dns",
    "banner_timeout",
    "auth_timeout",
    "passphrase",
    "disabled_algorithms",
    "host_key_policy",
    "host_key_file",
    "use_ssh_config",
    "ssh_config_path",
];

/// What to do when the server's host key is not in the known hosts file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Refuse the connection
    #[default]
    Reject,
    /// Accept and remember the key for the lifetime of the session
    AutoAdd,
    /// Log a warning and accept the key
    Warning,
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" => Ok(Self::Reject),
            "auto_add" | "autoadd" => Ok(Self::AutoAdd),
            "warning" | "warn" => Ok(Self::Warning),
            other => Err(TransportError::Configuration(format!(
                "Unknown host key policy '{}'",
                other
            ))),
        }
    }
}

/// Pre-established channel to use instead of a direct TCP connection
#[derive(Debug, Clone)]
pub enum Sock {
    /// Forwarding channel through a jump host
    Tunnel(Arc<Tunnel>),
    /// Command whose stdio carries the SSH stream
    ProxyCommand(ProxyCommand),
}

/// SSH connection parameters
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectConfig {
    /// Remote server to connect to
    pub hostname: String,
    /// Remote port
    #[serde(default = "default_port")]
    pub port: u16,
    /// User to authenticate as; the local user when unset
    #[serde(default)]
    pub username: Option<String>,
    /// Password for password authentication
    #[serde(default)]
    pub password: Option<String>,
    /// Private key files to try, in order
    #[serde(default)]
    pub key_filename: Vec<PathBuf>,
    /// TCP connect timeout
    #[serde(default, with = "duration_secs")]
    pub timeout: Option<Duration>,
    /// Try keys held by the SSH agent
    #[serde(default = "default_true")]
    pub allow_agent: bool,
    /// Try the default identity files under `~/.ssh`
    #[serde(default = "default_true")]
    pub look_for_keys: bool,
    /// Enable transport compression
    #[serde(default)]
    pub compress: bool,
    /// Channel to run the session over instead of a direct TCP connection
    #[serde(skip)]
    pub sock: Option<Sock>,
    /// GSS-API authentication
    #[serde(default)]
    pub gss_auth: bool,
    /// GSS-API key exchange
    #[serde(default)]
    pub gss_kex: bool,
    /// Delegate GSS-API client credentials
    #[serde(default = "default_true")]
    pub gss_deleg_creds: bool,
    /// Target name in the Kerberos database
    #[serde(default)]
    pub gss_host: Option<String>,
    /// Trust DNS to canonicalize the host name for GSS-API
    #[serde(default = "default_true")]
    pub gss_trust_dns: bool,
    /// Time to wait for the server banner
    #[serde(default, with = "duration_secs")]
    pub banner_timeout: Option<Duration>,
    /// Time to wait for an authentication response
    #[serde(default, with = "duration_secs")]
    pub auth_timeout: Option<Duration>,
    /// Passphrase for encrypted private keys
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Algorithms to remove from negotiation, keyed by group
    /// (`kex`, `keys`, `ciphers`, `macs`)
    #[serde(default)]
    pub disabled_algorithms: BTreeMap<String, Vec<String>>,
    /// Unknown host key handling
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Known hosts file to verify against
    #[serde(default)]
    pub host_key_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    SSH_PORT
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_filename", &self.key_filename)
            .field("timeout", &self.timeout)
            .field("allow_agent", &self.allow_agent)
            .field("look_for_keys", &self.look_for_keys)
            .field("compress", &self.compress)
            .field("sock", &self.sock)
            .field("gss_auth", &self.gss_auth)
            .field("gss_kex", &self.gss_kex)
            .field("banner_timeout", &self.banner_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("disabled_algorithms", &self.disabled_algorithms)
            .field("host_key_policy", &self.host_key_policy)
            .field("host_key_file", &self.host_key_file)
            .finish()
    }
}

impl ConnectConfig {
    /// Config with defaults for every field but the hostname
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: SSH_PORT,
            username: None,
            password: None,
            key_filename: Vec::new(),
            timeout: None,
            allow_agent: true,
            look_for_keys: true,
            compress: false,
            sock: None,
            gss_auth: false,
            gss_kex: false,
            gss_deleg_creds: true,
            gss_host: None,
            gss_trust_dns: true,
            banner_timeout: None,
            auth_timeout: None,
            passphrase: None,
            disabled_algorithms: BTreeMap::new(),
            host_key_policy: HostKeyPolicy::default(),
            host_key_file: None,
        }
    }

    /// Start a builder for `hostname`. The SSH config file is consulted by default.
    pub fn builder(hostname: impl Into<String>) -> ConnectConfigBuilder {
        ConnectConfigBuilder::new(hostname)
    }

    /// Config for `alias` resolved from `~/.ssh/config`
    pub fn from_ssh_config(alias: impl Into<String>) -> Result<Self, TransportError> {
        Self::builder(alias).build()
    }

    /// Build a config from string-keyed properties.
    ///
    /// Keys are the field names of this struct plus `use_ssh_config` and
    /// `ssh_config_path`. List values (`key_filename`) are comma-separated;
    /// `disabled_algorithms` uses `group:alg,alg;group:alg`. Durations are
    /// seconds.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let properties: BTreeMap<String, String> = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let unsupported: BTreeSet<&str> = properties
            .keys()
            .map(String::as_str)
            .filter(|key| !PROPERTIES.contains(key))
            .collect();
        if !unsupported.is_empty() {
            return Err(TransportError::Configuration(format!(
                "Unsupported configuration property (or properties): {:?}",
                unsupported
            )));
        }

        let hostname = properties.get("hostname").ok_or_else(|| {
            TransportError::Configuration("Missing required property 'hostname'".to_string())
        })?;

        let mut builder = Self::builder(hostname.clone());
        for (key, value) in &properties {
            builder = match key.as_str() {
                "hostname" => builder,
                "port" => builder.port(parse_property(key, value)?),
                "username" => builder.username(value.clone()),
                "password" => builder.password(value.clone()),
                "key_filename" => builder.key_filenames(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(PathBuf::from),
                ),
                "timeout" => builder.timeout(parse_seconds(key, value)?),
                "allow_agent" => builder.allow_agent(parse_bool_property(key, value)?),
                "look_for_keys" => builder.look_for_keys(parse_bool_property(key, value)?),
                "compress" => builder.compress(parse_bool_property(key, value)?),
                "gss_auth" => builder.gss_auth(parse_bool_property(key, value)?),
                "gss_kex" => builder.gss_kex(parse_bool_property(key, value)?),
                "gss_deleg_creds" => builder.gss_deleg_creds(parse_bool_property(key, value)?),
                "gss_host" => builder.gss_host(value.clone()),
                "gss_trust_dns" => builder.gss_trust_dns(parse_bool_property(key, value)?),
                "banner_timeout" => builder.banner_timeout(parse_seconds(key, value)?),
                "auth_timeout" => builder.auth_timeout(parse_seconds(key, value)?),
                "passphrase" => builder.passphrase(value.clone()),
                "disabled_algorithms" => builder.disabled_algorithms(parse_algorithms(value)?),
                "host_key_policy" => builder.host_key_policy(value.parse()?),
                "host_key_file" => builder.host_key_file(PathBuf::from(value)),
                "use_ssh_config" => builder.use_ssh_config(parse_bool_property(key, value)?),
                "ssh_config_path" => builder.ssh_config_path(PathBuf::from(value)),
                _ => builder,
            };
        }
        builder.build()
    }

    /// Overlay options resolved from an SSH config file
    pub fn apply_host_options(&mut self, options: &HostOptions) {
        if let Some(hostname) = &options.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(port) = options.port {
            self.port = port;
        }
        if let Some(user) = &options.user {
            self.username = Some(user.clone());
        }
        if !options.identity_files.is_empty() {
            self.key_filename = options.identity_files.clone();
        }
        if let Some(secs) = options.connect_timeout {
            self.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(forward_agent) = options.forward_agent {
            self.allow_agent = forward_agent;
        }
        // IdentitiesOnly=yes means no default key search
        if let Some(identities_only) = options.identities_only {
            self.look_for_keys = !identities_only;
        }
        if let Some(compression) = options.compression {
            self.compress = compression;
        }
        if let Some(gss_auth) = options.gssapi_authentication {
            self.gss_auth = gss_auth;
        }
        if let Some(gss_kex) = options.gssapi_key_exchange {
            self.gss_kex = gss_kex;
        }
        if let Some(deleg) = options.gssapi_delegate_credentials {
            self.gss_deleg_creds = deleg;
        }
        if let Some(command) = &options.proxy_command {
            self.sock = Some(Sock::ProxyCommand(ProxyCommand::new(command.clone())));
        }
    }

    /// The user to authenticate as
    pub fn effective_username(&self) -> String {
        self.username.clone().unwrap_or_else(local_username)
    }
}

/// Builder for [`ConnectConfig`].
///
/// Values set here take precedence over anything read from the SSH config
/// file, which in turn takes precedence over the defaults.
#[derive(Debug, Clone)]
pub struct ConnectConfigBuilder {
    hostname: String,
    use_ssh_config: bool,
    ssh_config_path: PathBuf,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    key_filename: Option<Vec<PathBuf>>,
    timeout: Option<Duration>,
    allow_agent: Option<bool>,
    look_for_keys: Option<bool>,
    compress: Option<bool>,
    sock: Option<Sock>,
    gss_auth: Option<bool>,
    gss_kex: Option<bool>,
    gss_deleg_creds: Option<bool>,
    gss_host: Option<String>,
    gss_trust_dns: Option<bool>,
    banner_timeout: Option<Duration>,
    auth_timeout: Option<Duration>,
    passphrase: Option<String>,
    disabled_algorithms: Option<BTreeMap<String, Vec<String>>>,
    host_key_policy: Option<HostKeyPolicy>,
    host_key_file: Option<PathBuf>,
}

impl ConnectConfigBuilder {
    /// Create a new builder
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            use_ssh_config: true,
            ssh_config_path: PathBuf::from(DEFAULT_SSH_CONFIG),
            port: None,
            username: None,
            password: None,
            key_filename: None,
            timeout: None,
            allow_agent: None,
            look_for_keys: None,
            compress: None,
            sock: None,
            gss_auth: None,
            gss_kex: None,
            gss_deleg_creds: None,
            gss_host: None,
            gss_trust_dns: None,
            banner_timeout: None,
            auth_timeout: None,
            passphrase: None,
            disabled_algorithms: None,
            host_key_policy: None,
            host_key_file: None,
        }
    }

    /// Enable/disable reading the SSH config file
    pub fn use_ssh_config(mut self, enabled: bool) -> Self {
        self.use_ssh_config = enabled;
        self
    }

    /// Read a config file other than `~/.ssh/config`
    pub fn ssh_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_config_path = path.into();
        self
    }

    /// Set the remote port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a private key file
    pub fn key_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_filename.get_or_insert_with(Vec::new).push(path.into());
        self
    }

    /// Replace the private key files
    pub fn key_filenames<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.key_filename = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Set the TCP connect timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable/disable SSH agent authentication
    pub fn allow_agent(mut self, allow: bool) -> Self {
        self.allow_agent = Some(allow);
        self
    }

    /// Enable/disable the default identity files
    pub fn look_for_keys(mut self, look: bool) -> Self {
        self.look_for_keys = Some(look);
        self
    }

    /// Enable/disable compression
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Run the session over an existing channel
    pub fn sock(mut self, sock: Sock) -> Self {
        self.sock = Some(sock);
        self
    }

    /// Enable/disable GSS-API authentication
    pub fn gss_auth(mut self, enabled: bool) -> Self {
        self.gss_auth = Some(enabled);
        self
    }

    /// Enable/disable GSS-API key exchange
    pub fn gss_kex(mut self, enabled: bool) -> Self {
        self.gss_kex = Some(enabled);
        self
    }

    /// Enable/disable GSS-API credential delegation
    pub fn gss_deleg_creds(mut self, enabled: bool) -> Self {
        self.gss_deleg_creds = Some(enabled);
        self
    }

    /// Set the Kerberos target name
    pub fn gss_host(mut self, host: impl Into<String>) -> Self {
        self.gss_host = Some(host.into());
        self
    }

    /// Trust DNS for GSS-API host canonicalization
    pub fn gss_trust_dns(mut self, trust: bool) -> Self {
        self.gss_trust_dns = Some(trust);
        self
    }

    /// Set the banner timeout
    pub fn banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = Some(timeout);
        self
    }

    /// Set the authentication timeout
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = Some(timeout);
        self
    }

    /// Set the private key passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set algorithms to exclude from negotiation
    pub fn disabled_algorithms(mut self, algorithms: BTreeMap<String, Vec<String>>) -> Self {
        self.disabled_algorithms = Some(algorithms);
        self
    }

    /// Set the unknown host key policy
    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = Some(policy);
        self
    }

    /// Set the known hosts file
    pub fn host_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_key_file = Some(path.into());
        self
    }

    /// Resolve defaults, the SSH config file overlay and explicit values
    pub fn build(self) -> Result<ConnectConfig, TransportError> {
        if self.hostname.trim().is_empty() {
            return Err(TransportError::Configuration(
                "Hostname must not be empty".to_string(),
            ));
        }

        let mut config = ConnectConfig::new(self.hostname.clone());

        if self.use_ssh_config {
            let options = SshConfigFile::from_path(&self.ssh_config_path)?.lookup(&self.hostname)?;
            debug!(
                "Applying SSH config for '{}' from {}",
                self.hostname,
                self.ssh_config_path.display()
            );
            config.apply_host_options(&options);
        }

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(username) = self.username {
            config.username = Some(username);
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(keys) = self.key_filename {
            config.key_filename = keys;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(allow) = self.allow_agent {
            config.allow_agent = allow;
        }
        if let Some(look) = self.look_for_keys {
            config.look_for_keys = look;
        }
        if let Some(compress) = self.compress {
            config.compress = compress;
        }
        if let Some(sock) = self.sock {
            config.sock = Some(sock);
        }
        if let Some(enabled) = self.gss_auth {
            config.gss_auth = enabled;
        }
        if let Some(enabled) = self.gss_kex {
            config.gss_kex = enabled;
        }
        if let Some(enabled) = self.gss_deleg_creds {
            config.gss_deleg_creds = enabled;
        }
        if let Some(host) = self.gss_host {
            config.gss_host = Some(host);
        }
        if let Some(trust) = self.gss_trust_dns {
            config.gss_trust_dns = trust;
        }
        if let Some(timeout) = self.banner_timeout {
            config.banner_timeout = Some(timeout);
        }
        if let Some(timeout) = self.auth_timeout {
            config.auth_timeout = Some(timeout);
        }
        if let Some(passphrase) = self.passphrase {
            config.passphrase = Some(passphrase);
        }
        if let Some(algorithms) = self.disabled_algorithms {
            config.disabled_algorithms = algorithms;
        }
        if let Some(policy) = self.host_key_policy {
            config.host_key_policy = policy;
        }
        if let Some(path) = self.host_key_file {
            config.host_key_file = Some(ssh_config::expand_tilde(&path));
        }

        Ok(config)
    }
}

/// Name of the local user, the default remote username
pub(crate) fn local_username() -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "root".to_string())
}

fn parse_property<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TransportError> {
    value.trim().parse().map_err(|_| {
        TransportError::Configuration(format!("Invalid value '{}' for property '{}'", value, key))
    })
}

fn parse_bool_property(key: &str, value: &str) -> Result<bool, TransportError> {
    parse_bool(value.trim()).ok_or_else(|| {
        TransportError::Configuration(format!("Invalid boolean '{}' for property '{}'", value, key))
    })
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, TransportError> {
    let secs: f64 = parse_property(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        TransportError::Configuration(format!(
            "Invalid duration '{}' for property '{}'",
            value, key
        ))
    })
}

fn parse_algorithms(value: &str) -> Result<BTreeMap<String, Vec<String>>, TransportError> {
    let mut algorithms = BTreeMap::new();
    for group in value.split(';').map(str::trim).filter(|g| !g.is_empty()) {
        let (name, list) = group.split_once(':').ok_or_else(|| {
            TransportError::Configuration(format!(
                "Invalid disabled_algorithms entry '{}', expected 'group:alg,alg'",
                group
            ))
        })?;
        algorithms.insert(
            name.trim().to_string(),
            list.split(',').map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect(),
        );
    }
    Ok(algorithms)
}

/// Serde helper storing optional durations as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::new("example.com");
        assert_eq!(config.port, 22);
        assert!(config.allow_agent);
        assert!(config.look_for_keys);
        assert!(!config.compress);
        assert!(config.gss_deleg_creds);
        assert!(config.gss_trust_dns);
        assert_eq!(config.host_key_policy, HostKeyPolicy::Reject);
        assert!(config.sock.is_none());
    }

    #[test]
    fn test_builder_without_ssh_config() {
        let config = ConnectConfig::builder("example.com")
            .use_ssh_config(false)
            .username("user")
            .password("secret")
            .port(2222)
            .key_filename("/keys/a")
            .key_filename("/keys/b")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(config.hostname, "example.com");
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.port, 2222);
        assert_eq!(config.key_filename, vec![PathBuf::from("/keys/a"), PathBuf::from("/keys/b")]);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_builder_applies_ssh_config() {
        let file = config_file(
            "Host web\n  HostName web.example.com\n  User deploy\n  Port 2200\n  \
             IdentityFile /keys/web\n  ConnectTimeout 7\n  Compression yes\n  \
             IdentitiesOnly yes\n  ForwardAgent no\n",
        );
        let config = ConnectConfig::builder("web")
            .ssh_config_path(file.path())
            .build()
            .unwrap();

        assert_eq!(config.hostname, "web.example.com");
        assert_eq!(config.username.as_deref(), Some("deploy"));
        assert_eq!(config.port, 2200);
        assert_eq!(config.key_filename, vec![PathBuf::from("/keys/web")]);
        assert_eq!(config.timeout, Some(Duration::from_secs(7)));
        assert!(config.compress);
        assert!(!config.look_for_keys);
        assert!(!config.allow_agent);
    }

    #[test]
    fn test_identities_only_no_keeps_key_search() {
        let file = config_file("Host web\n  IdentitiesOnly no\n");
        let config = ConnectConfig::builder("web")
            .ssh_config_path(file.path())
            .look_for_keys(false)
            .build()
            .unwrap();
        assert!(!config.look_for_keys);

        let config = ConnectConfig::builder("web")
            .ssh_config_path(file.path())
            .build()
            .unwrap();
        assert!(config.look_for_keys);
    }

    #[test]
    fn test_explicit_values_beat_ssh_config() {
        let file = config_file("Host web\n  User deploy\n  Port 2200\n");
        let config = ConnectConfig::builder("web")
            .ssh_config_path(file.path())
            .port(22)
            .build()
            .unwrap();

        assert_eq!(config.port, 22);
        assert_eq!(config.username.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_proxy_command_becomes_sock() {
        let file = config_file("Host inner\n  ProxyCommand nc %h %p\n");
        let config = ConnectConfig::builder("inner")
            .ssh_config_path(file.path())
            .build()
            .unwrap();

        match config.sock {
            Some(Sock::ProxyCommand(command)) => assert_eq!(command.command(), "nc inner 22"),
            other => panic!("unexpected sock: {:?}", other),
        }
    }

    #[test]
    fn test_missing_ssh_config_is_an_error() {
        let err = ConnectConfig::builder("web")
            .ssh_config_path("/nonexistent/sshlink/config")
            .build()
            .unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn test_empty_hostname() {
        let err = ConnectConfig::builder("  ").use_ssh_config(false).build().unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn test_from_properties() {
        let config = ConnectConfig::from_properties([
            ("hostname", "example.com"),
            ("username", "user"),
            ("port", "2022"),
            ("key_filename", "/keys/a, /keys/b"),
            ("allow_agent", "no"),
            ("timeout", "2.5"),
            ("disabled_algorithms", "ciphers:aes128-cbc,3des-cbc;kex:diffie-hellman-group1-sha1"),
            ("host_key_policy", "auto-add"),
            ("use_ssh_config", "false"),
        ])
        .unwrap();

        assert_eq!(config.port, 2022);
        assert_eq!(config.key_filename.len(), 2);
        assert!(!config.allow_agent);
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.disabled_algorithms.get("ciphers"),
            Some(&vec!["aes128-cbc".to_string(), "3des-cbc".to_string()])
        );
        assert_eq!(config.host_key_policy, HostKeyPolicy::AutoAdd);
    }

    #[test]
    fn test_from_properties_rejects_unknown_keys() {
        let err = ConnectConfig::from_properties([
            ("hostname", "example.com"),
            ("colour", "blue"),
            ("flavour", "mint"),
        ])
        .unwrap_err();

        match err {
            TransportError::Configuration(msg) => {
                assert!(msg.starts_with("Unsupported configuration property (or properties)"));
                assert!(msg.contains("colour"));
                assert!(msg.contains("flavour"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_properties_requires_hostname() {
        let err = ConnectConfig::from_properties([("username", "user")]).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn test_from_properties_bad_values() {
        assert!(ConnectConfig::from_properties([
            ("hostname", "h"),
            ("use_ssh_config", "no"),
            ("port", "abc"),
        ])
        .is_err());
        assert!(ConnectConfig::from_properties([
            ("hostname", "h"),
            ("use_ssh_config", "maybe"),
        ])
        .is_err());
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let err = serde_json::from_str::<ConnectConfig>(r#"{"hostname": "h", "sock_path": "/x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("sock_path"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"hostname": "h", "timeout": 1.5, "host_key_policy": "warning"}"#;
        let config: ConnectConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 22);
        assert!(config.allow_agent);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.host_key_policy, HostKeyPolicy::Warning);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1.5);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = ConnectConfig::new("h");
        config.password = Some("hunter2".to_string());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_effective_username() {
        let mut config = ConnectConfig::new("h");
        assert!(!config.effective_username().is_empty());
        config.username = Some("alice".to_string());
        assert_eq!(config.effective_username(), "alice");
    }
}
