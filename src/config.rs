//! Pool settings and namespaced configuration lookup.

use crate::error::Error;
use ::config::{Config, ConfigError};
use std::path::PathBuf;

/// Default address the listening socket binds to (all IPv4 interfaces).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
/// Default upper bound on simultaneously live connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, ConfigError>,
{
    if name.is_empty() {
        return getter(config, key);
    }
    // Only a missing namespaced key falls back, a malformed one is an error.
    match getter(config, &format!("{name}.{key}")) {
        Err(ConfigError::NotFound(_)) => getter(config, key),
        result => result,
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_u32(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u32, ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u32>(key))
}

pub(crate) fn get_namespaced_u16(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u16, ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u16>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, ConfigError> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}

// Missing keys fall back to the default, malformed values are reported.
fn or_default<T>(result: Result<T, ConfigError>, default: T) -> Result<T, Error> {
    match result {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(err) => Err(err.into()),
    }
}

fn optional<T>(result: Result<T, ConfigError>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Settings of a [`ConnectionPool`](crate::ConnectionPool), fixed at
/// construction.
///
/// # Configuration Keys
///
/// | key               | type   | default   |
/// |-------------------|--------|-----------|
/// | `transport_type`  | string | `"tcp"`   |
/// | `bind_address`    | string | `0.0.0.0` |
/// | `port`            | u16    | `0`       |
/// | `max_connections` | usize  | `64`      |
/// | `blocking`        | bool   | `false`   |
/// | `max_inactivity`  | u32    | `0`       |
/// | `tls_server_key`  | string | none      |
/// | `tls_server_cert` | string | none      |
///
/// `transport_type = "tls"` requires both `tls_server_key` and
/// `tls_server_cert`. A `max_inactivity` of 0 disables idle eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub bind_address: String,
    pub port: u16,
    pub max_connections: usize,
    pub tls: bool,
    pub blocking: bool,
    pub max_inactivity: u32,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
}

impl PoolSettings {
    /// Plain TCP, non-blocking settings for `port` with idle eviction disabled.
    pub fn new(port: u16, max_connections: usize) -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port,
            max_connections,
            tls: false,
            blocking: false,
            max_inactivity: 0,
            key_path: None,
            cert_path: None,
        }
    }

    /// Enables TLS with the given PEM-encoded private key and certificate.
    pub fn with_tls(mut self, key_path: impl Into<PathBuf>, cert_path: impl Into<PathBuf>) -> Self {
        self.tls = true;
        self.key_path = Some(key_path.into());
        self.cert_path = Some(cert_path.into());
        self
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_max_inactivity(mut self, max_inactivity: u32) -> Self {
        self.max_inactivity = max_inactivity;
        self
    }

    /// Reads settings from a configuration without namespacing.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::from_config_named(config, "")
    }

    /// Reads settings from a configuration with namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `game_server.port`)
    /// 2. `{key}` (e.g., `port`)
    /// 3. Hard-coded default
    pub fn from_config_named(config: &Config, name: &str) -> Result<Self, Error> {
        let transport_type = or_default(
            get_namespaced_string(config, name, "transport_type"),
            "tcp".to_string(),
        )?;
        let tls = match transport_type.as_str() {
            "tcp" => false,
            "tls" => true,
            _ => {
                return Err(Error::InvalidTransportType {
                    got: transport_type,
                    valid: vec!["tcp".to_string(), "tls".to_string()],
                })
            }
        };

        let key_path = optional(get_namespaced_string(config, name, "tls_server_key"))?;
        let cert_path = optional(get_namespaced_string(config, name, "tls_server_cert"))?;
        if tls && (key_path.is_none() || cert_path.is_none()) {
            return Err(Error::TlsServerConfigMissing);
        }

        Ok(Self {
            bind_address: or_default(
                get_namespaced_string(config, name, "bind_address"),
                DEFAULT_BIND_ADDRESS.to_string(),
            )?,
            port: or_default(get_namespaced_u16(config, name, "port"), 0)?,
            max_connections: or_default(
                get_namespaced_usize(config, name, "max_connections"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            tls,
            blocking: or_default(get_namespaced_bool(config, name, "blocking"), false)?,
            max_inactivity: or_default(get_namespaced_u32(config, name, "max_inactivity"), 0)?,
            key_path: key_path.map(PathBuf::from),
            cert_path: cert_path.map(PathBuf::from),
        })
    }
}
