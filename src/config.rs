//! SSH server targets, read from `SSH_<alias>_URI` environment variables.
//!
//! Each value has the form `username:password@host[:port]`. Values are parsed
//! and validated once when the server starts.

use std::collections::BTreeMap;
use std::fmt;

use url::{Host, Url};

use crate::error::{McpOpsError, Result};

const VAR_PREFIX: &str = "SSH_";
const VAR_SUFFIX: &str = "_URI";
const DEFAULT_SSH_PORT: u16 = 22;

/// Name of the environment variable that configures `alias`.
pub fn env_var_name(alias: &str) -> String {
    format!("{VAR_PREFIX}{alias}{VAR_SUFFIX}")
}

#[derive(Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub alias: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl ServerTarget {
    /// Parses `username:password@host[:port]`.
    ///
    /// The credentials split on the first `:` and the address on the last `@`,
    /// so passwords may contain either character.
    pub fn parse(alias: &str, uri: &str) -> Result<Self> {
        let invalid = |reason: &str| McpOpsError::InvalidTarget {
            var: env_var_name(alias),
            reason: reason.to_string(),
        };

        let (credentials, address) = uri
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| invalid("expected 'username:password@host:port'"))?;

        let (username, password) = credentials
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' between username and password"))?;
        if username.is_empty() {
            return Err(invalid("username is empty"));
        }

        let (host, port) = split_host_port(address).map_err(|reason| invalid(&reason))?;
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }

        Ok(Self {
            alias: alias.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host,
            port,
        })
    }

    /// `user@host:port`, safe to display.
    pub fn display_address(&self) -> String {
        if self.host.contains(':') {
            format!("{}@[{}]:{}", self.username, self.host, self.port)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }
}

impl fmt::Debug for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTarget")
            .field("alias", &self.alias)
            .field("username", &self.username)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Splits `host[:port]` using URL authority rules, which also handles
/// bracketed IPv6 literals.
fn split_host_port(address: &str) -> std::result::Result<(String, u16), String> {
    let parsed = Url::parse(&format!("ssh://{address}"))
        .map_err(|e| format!("invalid address '{address}': {e}"))?;
    if !parsed.path().is_empty() || parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(format!("unexpected characters after host in '{address}'"));
    }

    let host = match parsed.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Domain(name)) => name.to_string(),
        None => String::new(),
    };
    match parsed.port() {
        Some(0) => Err("invalid port '0'".to_string()),
        Some(port) => Ok((host, port)),
        None => Ok((host, DEFAULT_SSH_PORT)),
    }
}

/// All configured SSH targets, keyed by alias.
#[derive(Debug, Clone, Default)]
pub struct SshTargets {
    targets: BTreeMap<String, ServerTarget>,
}

impl SshTargets {
    /// Collects targets from `(name, value)` pairs, ignoring names that do not
    /// follow the `SSH_<alias>_URI` convention. Any malformed value fails the
    /// whole load.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut targets = BTreeMap::new();
        for (name, value) in vars {
            let Some(alias) = name
                .strip_prefix(VAR_PREFIX)
                .and_then(|rest| rest.strip_suffix(VAR_SUFFIX))
            else {
                continue;
            };
            if alias.is_empty() {
                continue;
            }
            let target = ServerTarget::parse(alias, &value)?;
            targets.insert(alias.to_string(), target);
        }
        Ok(Self { targets })
    }

    /// Reads the process environment. Variables whose name or value is not
    /// valid UTF-8 are skipped.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars_os().filter_map(|(name, value)| {
            Some((name.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    pub fn get(&self, alias: &str) -> Option<&ServerTarget> {
        self.targets.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
