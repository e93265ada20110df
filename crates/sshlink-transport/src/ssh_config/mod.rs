//! SSH configuration file parsing and host lookup
//!
//! Reads an OpenSSH client configuration file and resolves the options that
//! apply to one host alias. Only the keywords that feed a connect call are
//! surfaced as typed fields on [`HostOptions`]; everything else is kept in
//! [`HostOptions::other`].

mod parser;
mod pattern;

use crate::config::local_username;
use crate::{TransportError, SSH_PORT};
use parser::{Block, Criteria, MatchCriterion, MatchKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options resolved from an SSH config file for a single host alias
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOptions {
    /// `HostName`, defaulting to the alias
    pub hostname: Option<String>,
    /// `Port`
    pub port: Option<u16>,
    /// `User`
    pub user: Option<String>,
    /// Every `IdentityFile`, in file order
    pub identity_files: Vec<PathBuf>,
    /// `ConnectTimeout` in seconds
    pub connect_timeout: Option<u64>,
    /// `ForwardAgent`
    pub forward_agent: Option<bool>,
    /// `IdentitiesOnly`
    ///
    /// Applied inverted: `yes` turns off the default identity search, so only
    /// configured key files and the agent are tried.
    pub identities_only: Option<bool>,
    /// `Compression`
    pub compression: Option<bool>,
    /// `GSSAPIAuthentication`
    pub gssapi_authentication: Option<bool>,
    /// `GSSAPIKeyExchange`
    pub gssapi_key_exchange: Option<bool>,
    /// `GSSAPIDelegateCredentials`
    pub gssapi_delegate_credentials: Option<bool>,
    /// `ProxyCommand` with tokens expanded; `none` resolves to `None`
    pub proxy_command: Option<String>,
    /// Any other keyword, lowercased, first value wins
    pub other: BTreeMap<String, String>,
}

/// A parsed SSH configuration file
#[derive(Debug, Clone, Default)]
pub struct SshConfigFile {
    blocks: Vec<Block>,
}

impl SshConfigFile {
    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, TransportError> {
        Ok(Self {
            blocks: parser::parse_blocks(content)?,
        })
    }

    /// Read and parse a configuration file. A leading `~` is expanded.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = expand_tilde(path.as_ref());
        if !path.exists() {
            return Err(TransportError::Configuration(format!(
                "SSH configuration file '{}' cannot be found.",
                path.display()
            )));
        }

        debug!("Reading SSH configuration from {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    /// Resolve the options that apply to `alias`.
    ///
    /// Blocks are visited in file order and the first value obtained for a
    /// keyword wins, except `IdentityFile` which accumulates.
    pub fn lookup(&self, alias: &str) -> Result<HostOptions, TransportError> {
        let local_user = local_username();
        let mut values: BTreeMap<String, (String, usize)> = BTreeMap::new();
        let mut identity_files: Vec<String> = Vec::new();

        for block in &self.blocks {
            let applies = match &block.criteria {
                Criteria::Global => true,
                Criteria::Host(patterns) => pattern::matches_host_patterns(alias, patterns),
                Criteria::Match(criteria) => {
                    let context = MatchContext {
                        hostname: values
                            .get("hostname")
                            .map(|(v, _)| v.replace("%h", alias))
                            .unwrap_or_else(|| alias.to_string()),
                        original_host: alias,
                        user: values
                            .get("user")
                            .map(|(v, _)| v.clone())
                            .unwrap_or_else(|| local_user.clone()),
                        local_user: &local_user,
                    };
                    context.matches(criteria)
                }
            };

            if !applies {
                continue;
            }

            for option in &block.options {
                if option.keyword == "identityfile" {
                    identity_files.push(option.value.clone());
                } else {
                    values
                        .entry(option.keyword.clone())
                        .or_insert_with(|| (option.value.clone(), option.line));
                }
            }
        }

        resolve(alias, &local_user, values, identity_files)
    }
}

/// Load the options for `hostname` from the config file at `config_file`
pub fn load_ssh_config(
    hostname: &str,
    config_file: impl AsRef<Path>,
) -> Result<HostOptions, TransportError> {
    SshConfigFile::from_path(config_file)?.lookup(hostname)
}

struct MatchContext<'a> {
    hostname: String,
    original_host: &'a str,
    user: String,
    local_user: &'a str,
}

impl MatchContext<'_> {
    fn matches(&self, criteria: &[MatchCriterion]) -> bool {
        criteria.iter().all(|criterion| {
            let matched = match criterion.kind {
                MatchKind::All => true,
                MatchKind::Host => {
                    pattern::matches_pattern_list(&self.hostname, &criterion.patterns)
                }
                MatchKind::OriginalHost => {
                    pattern::matches_pattern_list(self.original_host, &criterion.patterns)
                }
                MatchKind::User => pattern::matches_pattern_list(&self.user, &criterion.patterns),
                MatchKind::LocalUser => {
                    pattern::matches_pattern_list(self.local_user, &criterion.patterns)
                }
            };
            matched != criterion.negated
        })
    }
}

fn resolve(
    alias: &str,
    local_user: &str,
    mut values: BTreeMap<String, (String, usize)>,
    identity_files: Vec<String>,
) -> Result<HostOptions, TransportError> {
    let mut options = HostOptions::default();

    let hostname = values
        .remove("hostname")
        .map(|(v, _)| v.replace("%h", alias))
        .unwrap_or_else(|| alias.to_string());

    if let Some((value, line)) = values.remove("port") {
        options.port = Some(parse_int(&value, "Port", line)?);
    }
    options.user = values.remove("user").map(|(v, _)| v);

    let tokens = Tokens {
        hostname: &hostname,
        port: options.port.unwrap_or(SSH_PORT),
        remote_user: options.user.as_deref().unwrap_or(local_user),
        alias,
        local_user,
    };

    options.identity_files = identity_files
        .iter()
        .map(|file| expand_tilde(Path::new(&tokens.expand(file))))
        .collect();

    if let Some((value, line)) = values.remove("connecttimeout") {
        options.connect_timeout = Some(parse_int(&value, "ConnectTimeout", line)?);
    }
    options.forward_agent = take_bool(&mut values, "forwardagent")?;
    options.identities_only = take_bool(&mut values, "identitiesonly")?;
    options.compression = take_bool(&mut values, "compression")?;
    options.gssapi_authentication = take_bool(&mut values, "gssapiauthentication")?;
    options.gssapi_key_exchange = take_bool(&mut values, "gssapikeyexchange")?;
    options.gssapi_delegate_credentials = take_bool(&mut values, "gssapidelegatecredentials")?;

    options.proxy_command = values
        .remove("proxycommand")
        .filter(|(v, _)| !v.eq_ignore_ascii_case("none"))
        .map(|(v, _)| tokens.expand(&v));

    options.hostname = Some(hostname);
    options.other = values.into_iter().map(|(k, (v, _))| (k, v)).collect();
    Ok(options)
}

fn take_bool(
    values: &mut BTreeMap<String, (String, usize)>,
    keyword: &str,
) -> Result<Option<bool>, TransportError> {
    values
        .remove(keyword)
        .map(|(value, line)| {
            parse_bool(&value).ok_or_else(|| TransportError::Parse {
                line,
                message: format!("Invalid boolean '{}' for {}", value, keyword),
            })
        })
        .transpose()
}

fn parse_int<T: std::str::FromStr>(
    value: &str,
    keyword: &str,
    line: usize,
) -> Result<T, TransportError> {
    value.parse().map_err(|_| TransportError::Parse {
        line,
        message: format!("Invalid integer '{}' for {}", value, keyword),
    })
}

/// Parse an ssh_config style boolean (`yes`/`no`/`true`/`false`)
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the user's home directory
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Percent-token substitution values
struct Tokens<'a> {
    hostname: &'a str,
    port: u16,
    remote_user: &'a str,
    alias: &'a str,
    local_user: &'a str,
}

impl Tokens<'_> {
    fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('h') => out.push_str(self.hostname),
                Some('p') => out.push_str(&self.port.to_string()),
                Some('r') => out.push_str(self.remote_user),
                Some('n') => out.push_str(self.alias),
                Some('u') => out.push_str(self.local_user),
                Some('d') => {
                    if let Some(home) = dirs::home_dir() {
                        out.push_str(&home.to_string_lossy());
                    }
                }
                Some('%') => out.push('%'),
                // Unknown tokens are left untouched.
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        out
    }
}
