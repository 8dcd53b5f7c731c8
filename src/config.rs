use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lifecycle::LifecycleConfig;
use net::ConnectionLimits;
use serde::Deserialize;
use session::ActorConfig;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetSection {
    pub addr: String,
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub mailbox_capacity: usize,
    pub outbound_buffer: usize,
    pub grace_period_secs: u64,
    pub reap_interval_secs: u64,
    pub flush_interval_ms: u64,
    pub max_message_bytes: usize,
    pub max_messages_per_second: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            outbound_buffer: 64,
            grace_period_secs: 30,
            reap_interval_secs: 5,
            flush_interval_ms: 1000,
            max_message_bytes: 16 * 1024,
            max_messages_per_second: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub default_max_players: usize,
    pub max_players_limit: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_max_players: 4,
            max_players_limit: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub backend: StoreBackend,
    pub dir: String,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            dir: "data/sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Bearer token -> player id.
    pub tokens: BTreeMap<String, String>,
}

/// Top-level sync server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub net: NetSection,
    pub sync: SyncSection,
    pub session: SessionSection,
    pub persistence: PersistenceSection,
    pub auth: AuthSection,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("usage: sync_server [--config <path>] ({0})")]
    Usage(String),
}

impl ServerConfig {
    /// Defaults when `path` is `None`; a named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.max_players_limit == 0 {
            return Err(ConfigError::Invalid("session.max_players_limit must be at least 1".into()));
        }
        if session.default_max_players == 0 || session.default_max_players > session.max_players_limit {
            return Err(ConfigError::Invalid(format!(
                "session.default_max_players must be between 1 and {}",
                session.max_players_limit
            )));
        }
        if self.sync.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("sync.outbound_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn to_actor_config(&self) -> ActorConfig {
        ActorConfig {
            mailbox_capacity: self.sync.mailbox_capacity,
            flush_interval: Duration::from_millis(self.sync.flush_interval_ms.max(1)),
        }
    }

    pub fn to_lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            default_max_players: self.session.default_max_players,
            max_players_limit: self.session.max_players_limit,
            grace_period: Duration::from_secs(self.sync.grace_period_secs),
            reap_interval: Duration::from_secs(self.sync.reap_interval_secs.max(1)),
        }
    }

    pub fn to_connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            outbound_buffer: self.sync.outbound_buffer,
            max_message_bytes: self.sync.max_message_bytes,
            max_messages_per_second: self.sync.max_messages_per_second,
        }
    }
}

/// Config path from `--config <path>`, skipping the program name.
fn config_path_from<I>(args: I) -> Result<Option<PathBuf>, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(p) => path = Some(PathBuf::from(p)),
                None => return Err(ConfigError::Usage("--config needs a path".into())),
            },
            other => return Err(ConfigError::Usage(format!("unknown argument {other}"))),
        }
    }
    Ok(path)
}

/// Load the config named on the command line, or defaults.
pub fn parse_cli_args() -> Result<ServerConfig, ConfigError> {
    let path = config_path_from(std::env::args())?;
    ServerConfig::load(path.as_deref())
}
