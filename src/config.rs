//! Configuration.
//!
//! - [`AppConfig`] - the raw mapping an application is created with
//! - [`ServiceConfig`] - per-service defaults, overlaid once with the app
//!   section named after the service
//! - [`ServerConfig`] - listen address, worker count and TLS settings, read
//!   from the app section `server`
//!
//! # Example
//!
//! ```ignore
//! let app_config = AppConfig::from_json_str(r#"{
//!     "helloworld.Greeter": {"ignore": ["x"]},
//!     "server": {"port": 50052}
//! }"#)?;
//!
//! let server = app_config.server()?;
//! assert_eq!(server.endpoint(), "[::]:50052");
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::codec::Mapping;
use crate::error::{Result, RpcwireError};

/// Key of the server section in the app configuration.
pub const SERVER_SECTION: &str = "server";

/// Default listen host, all interfaces.
pub const DEFAULT_HOST: &str = "[::]";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 50051;

/// Default number of concurrent calls a server runs.
pub const DEFAULT_WORKERS: usize = 10;

/// Application-wide configuration mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    values: Mapping,
}

impl AppConfig {
    /// Wrap an existing mapping.
    pub fn new(values: Mapping) -> Self {
        Self { values }
    }

    /// Parse a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Json`] if `json` is not a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Read a JSON object from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded app config from {}", path.display());
        Self::from_json_str(&json)
    }

    /// Top-level value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Top-level section by key, if it is an object.
    pub fn section(&self, key: &str) -> Option<&Mapping> {
        self.values.get(key).and_then(Value::as_object)
    }

    /// The whole mapping.
    #[inline]
    pub fn values(&self) -> &Mapping {
        &self.values
    }

    /// Server settings from the `server` section; defaults when absent.
    ///
    /// The result is validated, see [`ServerConfig::validate`].
    pub fn server(&self) -> Result<ServerConfig> {
        let config = match self.values.get(SERVER_SECTION) {
            Some(value) => ServerConfig::deserialize(value)?,
            None => ServerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<Mapping> for AppConfig {
    fn from(values: Mapping) -> Self {
        Self::new(values)
    }
}

/// Per-service configuration.
///
/// Holds the service defaults until the service joins an app; then the app
/// section named [`name`](Self::name) is overlaid on the defaults, one level
/// deep, exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    name: String,
    values: Mapping,
    merged: bool,
}

impl ServiceConfig {
    /// Create a config owned by `name` with `defaults`.
    pub fn new(name: impl Into<String>, defaults: Mapping) -> Self {
        Self {
            name: name.into(),
            values: defaults,
            merged: false,
        }
    }

    /// Name of the app section this config reads.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the app section has been merged.
    #[inline]
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    /// Overlay the app section on the defaults.
    ///
    /// Keys in the section replace default keys wholesale; nested objects
    /// are not merged. Later calls are no-ops.
    pub fn merge(&mut self, app: &AppConfig) {
        if self.merged {
            return;
        }
        self.merged = true;

        match app.get(&self.name) {
            Some(Value::Object(section)) => {
                for (key, value) in section {
                    self.values.insert(key.clone(), value.clone());
                }
                tracing::debug!("Merged {} app config keys into {}", section.len(), self.name);
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                tracing::warn!(
                    "App config section {} is not an object ({}); using defaults",
                    self.name,
                    other
                );
            }
        }
    }

    /// The current values.
    #[inline]
    pub fn values(&self) -> &Mapping {
        &self.values
    }

    /// Value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Server settings.
///
/// Fields map one to one onto the `server` section of the app config; all
/// of them are optional there.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen host; `[::]` when unset.
    pub host: Option<String>,
    /// Listen port.
    pub port: u16,
    /// Maximum concurrent calls.
    pub workers: usize,
    /// Verbose transport logging.
    pub debug: bool,
    /// Use ALTS credentials instead of TLS.
    pub alts: bool,
    /// TLS private key path.
    pub private_key: Option<PathBuf>,
    /// TLS certificate path.
    pub certificate: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            debug: false,
            alts: false,
            private_key: None,
            certificate: None,
        }
    }
}

impl ServerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the listen port.
    ///
    /// Default: 50051
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the maximum number of concurrent calls.
    ///
    /// Default: 10
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enable verbose transport logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enable ALTS credentials.
    pub fn alts(mut self, alts: bool) -> Self {
        self.alts = alts;
        self
    }

    /// Set the TLS key and certificate paths.
    pub fn tls(mut self, private_key: impl Into<PathBuf>, certificate: impl Into<PathBuf>) -> Self {
        self.private_key = Some(private_key.into());
        self.certificate = Some(certificate.into());
        self
    }

    /// `host:port` the server listens on.
    pub fn endpoint(&self) -> String {
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        format!("{host}:{}", self.port)
    }

    /// True when both TLS paths are set.
    pub fn is_tls(&self) -> bool {
        self.private_key.is_some() && self.certificate.is_some()
    }

    /// Check the settings before a server starts.
    ///
    /// # Errors
    ///
    /// - [`RpcwireError::ServerSslConfig`] when only one of `private_key` and
    ///   `certificate` is set (the message names the missing key), or when
    ///   ALTS is combined with TLS
    /// - [`RpcwireError::ServerConfig`] when `workers` is zero
    pub fn validate(&self) -> Result<()> {
        match (&self.private_key, &self.certificate) {
            (Some(_), None) => {
                return Err(RpcwireError::ServerSslConfig(
                    "certificate must be set together with private_key".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(RpcwireError::ServerSslConfig(
                    "private_key must be set together with certificate".to_string(),
                ))
            }
            _ => {}
        }
        if self.alts && self.is_tls() {
            return Err(RpcwireError::ServerSslConfig(
                "alts can not be combined with private_key/certificate".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(RpcwireError::ServerConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
