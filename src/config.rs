//! Layered configuration for the relay.
//!
//! Settings are read from `tfs-relay.toml`, then overridden by `TFS_*`
//! environment variables, then by command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! url = "https://tfs.corp:8080/tfs/DefaultCollection"
//! username = "corp/builder"
//! password = "..."
//!
//! [build]
//! project = "Fabrikam"
//! definition = 12
//!
//! [appender]
//! flush_interval_ms = 1000
//! batch_size = 100
//! shutdown_timeout_secs = 30
//! # queue_capacity = 10000
//!
//! [transport]
//! proxy_url = "http://proxy.corp:3128"
//! keystore_path = "/etc/ssl/proxy-root.pem"
//! trust_store_type = "PEM"
//! security_protocol = "TLSv1.2"
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::appender::AppenderSettings;
use crate::client::TransportConfig;

pub const CONFIG_FILE_NAME: &str = "tfs-relay.toml";

/// Connection settings for the TFS collection.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for ServerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSection")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which build definition mirrors local builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub definition: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppenderSection {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Unbounded when absent
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for AppenderSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            queue_capacity: None,
        }
    }
}

/// Command-line values that win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project: Option<String>,
    pub definition: Option<i32>,
}

/// Root of `tfs-relay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub appender: AppenderSection,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Everything needed to mirror a build to one TFS build definition.
#[derive(Clone, PartialEq)]
pub struct TfsConfiguration {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub project: String,
    pub build_definition: i32,
}

impl fmt::Display for TfsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server: {}, user: {}, project: {}, build definition: {}",
            self.server_url, self.username, self.project, self.build_definition
        )
    }
}

impl fmt::Debug for TfsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TfsConfiguration({})", self)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tfs-relay.toml")
    }

    /// Load `tfs-relay.toml` from `dir`, or defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay `TFS_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_value("TFS_SERVER_URL") {
            self.server.url = Some(v);
        }
        if let Some(v) = env_value("TFS_USERNAME") {
            self.server.username = Some(v);
        }
        if let Some(v) = env_value("TFS_PASSWORD") {
            self.server.password = Some(v);
        }
        if let Some(v) = env_value("TFS_PROJECT") {
            self.build.project = Some(v);
        }
        if let Some(v) = env_value("TFS_BUILD_DEFINITION") {
            let definition = v
                .parse::<i32>()
                .with_context(|| format!("TFS_BUILD_DEFINITION is not a number: {}", v))?;
            self.build.definition = Some(definition);
        }
        self.transport = self.transport.apply_env();
        Ok(self)
    }

    pub fn with_cli_overrides(mut self, cli: &CliOverrides) -> Self {
        if let Some(v) = &cli.server_url {
            self.server.url = Some(v.clone());
        }
        if let Some(v) = &cli.username {
            self.server.username = Some(v.clone());
        }
        if let Some(v) = &cli.password {
            self.server.password = Some(v.clone());
        }
        if let Some(v) = &cli.project {
            self.build.project = Some(v.clone());
        }
        if let Some(v) = cli.definition {
            self.build.definition = Some(v);
        }
        self
    }

    /// File (explicit path, or `tfs-relay.toml` in `dir`) → environment → CLI.
    pub fn resolve(config_path: Option<&Path>, dir: &Path, cli: &CliOverrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(dir)?,
        };
        Ok(file.apply_env()?.with_cli_overrides(cli))
    }

    /// `None` unless server URL, project and build definition are all set.
    pub fn tfs_configuration(&self) -> Option<TfsConfiguration> {
        Some(TfsConfiguration {
            server_url: self.server.url.clone()?,
            username: self.server.username.clone().unwrap_or_default(),
            password: self.server.password.clone().unwrap_or_default(),
            project: self.build.project.clone()?,
            build_definition: self.build.definition?,
        })
    }

    pub fn appender_settings(&self) -> AppenderSettings {
        AppenderSettings {
            flush_interval: Duration::from_millis(self.appender.flush_interval_ms.max(1)),
            batch_size: self.appender.batch_size.max(1),
            shutdown_timeout: Duration::from_secs(self.appender.shutdown_timeout_secs),
            queue_capacity: self.appender.queue_capacity.filter(|c| *c > 0),
        }
    }

    /// Human-readable warnings about questionable settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.url.is_none() {
            warnings.push("server.url is not set; builds will not be mirrored".to_string());
        }
        if self.build.project.is_none() {
            warnings.push("build.project is not set".to_string());
        }
        if self.build.definition.is_none() {
            warnings.push("build.definition is not set".to_string());
        }
        if self.server.url.is_some() && self.server.password.is_none() {
            warnings.push("server.password is not set".to_string());
        }
        if self.appender.batch_size == 0 {
            warnings.push("appender.batch_size must be at least 1; using 1".to_string());
        }
        if self.appender.queue_capacity == Some(0) {
            warnings.push("appender.queue_capacity of 0 means unbounded".to_string());
        }
        warnings
    }
}
