//! Configuration for devmesh controller nodes.
//!
//! A TOML file at the platform config path, overridden by `DEVMESH_*`
//! environment variables, translated into `devmesh_core::CoreConfig`.
//! Nested keys use a double underscore in the environment, e.g.
//! `DEVMESH_HANDSHAKE__TIMEOUT_MS=2000`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use devmesh_core::{CoreConfig, NodeId};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration of one node.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Cluster identity of this node. Generated at startup when unset.
    pub node_id: Option<String>,

    #[serde(default)]
    pub handshake: HandshakeSection,

    #[serde(default)]
    pub events: EventsSection,

    #[serde(default)]
    pub cluster: ClusterSection,
}

/// Driver call bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HandshakeSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_role_change_timeout_ms")]
    pub role_change_timeout_ms: u64,
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            role_change_timeout_ms: default_role_change_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventsSection {
    /// Events buffered per listener before posting waits.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterSection {
    #[serde(default = "default_replication_buffer")]
    pub replication_buffer: usize,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            replication_buffer: default_replication_buffer(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_role_change_timeout_ms() -> u64 {
    5_000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_replication_buffer() -> usize {
    1024
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "devmesh", "devmesh").map_or_else(
        || PathBuf::from(".devmesh").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the node config from the canonical path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the node config from `path` and the environment. A missing file
/// yields the defaults plus any environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DEVMESH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize `cfg` as TOML to `path`, creating parent directories.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Validate `cfg` and build the runtime configuration for the core.
pub fn to_core_config(cfg: &Config) -> Result<CoreConfig, ConfigError> {
    fn positive(field: &str, value: u64) -> Result<u64, ConfigError> {
        if value == 0 {
            return Err(ConfigError::Validation {
                field: field.into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }

    let node_id = match cfg.node_id.as_deref().map(str::trim) {
        Some("") => {
            return Err(ConfigError::Validation {
                field: "node_id".into(),
                reason: "must not be empty".into(),
            });
        }
        Some(id) => NodeId::new(id),
        None => NodeId::random(),
    };

    let handshake_timeout = positive("handshake.timeout_ms", cfg.handshake.timeout_ms)?;
    let role_change_timeout = positive(
        "handshake.role_change_timeout_ms",
        cfg.handshake.role_change_timeout_ms,
    )?;
    if cfg.events.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "events.queue_capacity".into(),
            reason: "must be greater than zero".into(),
        });
    }

    Ok(CoreConfig {
        node_id,
        handshake_timeout: Duration::from_millis(handshake_timeout),
        role_change_timeout: Duration::from_millis(role_change_timeout),
        event_queue_capacity: cfg.events.queue_capacity,
        replication_buffer: cfg.cluster.replication_buffer.max(1),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Loading reads `DEVMESH_*` from the process environment, so every
    // test that loads runs inside a figment jail.

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_| {
            let cfg = load_config_from(Path::new("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg, Config::default());
            Ok(())
        });
    }

    #[test]
    fn file_values_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "node_id = \"ctrl-1\"\n\n[handshake]\ntimeout_ms = 2500\n\n[events]\nqueue_capacity = 16\n",
            )?;

            let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.node_id.as_deref(), Some("ctrl-1"));
            assert_eq!(cfg.handshake.timeout_ms, 2500);
            assert_eq!(cfg.handshake.role_change_timeout_ms, 5_000);
            assert_eq!(cfg.events.queue_capacity, 16);

            let core = to_core_config(&cfg).map_err(|e| e.to_string())?;
            assert_eq!(core.node_id.as_str(), "ctrl-1");
            assert_eq!(core.handshake_timeout, Duration::from_millis(2500));
            assert_eq!(core.event_queue_capacity, 16);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[events]\nqueue_capacity = 16\n")?;
            jail.set_env("DEVMESH_EVENTS__QUEUE_CAPACITY", "32");
            jail.set_env("DEVMESH_NODE_ID", "from-env");

            let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.events.queue_capacity, 32);
            assert_eq!(cfg.node_id.as_deref(), Some("from-env"));
            Ok(())
        });
    }

    #[test]
    fn save_then_load() {
        figment::Jail::expect_with(|_| {
            let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
            let path = dir.path().join("nested").join("config.toml");
            let cfg = Config {
                node_id: Some("ctrl-2".into()),
                ..Config::default()
            };

            save_config_to(&path, &cfg).map_err(|e| e.to_string())?;
            assert_eq!(load_config_from(&path).map_err(|e| e.to_string())?, cfg);
            Ok(())
        });
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = Config::default();
        cfg.handshake.timeout_ms = 0;
        let err = to_core_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "handshake.timeout_ms"));
    }

    #[test]
    fn blank_node_id_is_rejected() {
        let cfg = Config {
            node_id: Some("  ".into()),
            ..Config::default()
        };
        assert!(to_core_config(&cfg).is_err());
    }

    #[test]
    fn unset_node_id_is_generated() {
        let a = to_core_config(&Config::default()).unwrap();
        let b = to_core_config(&Config::default()).unwrap();
        assert_ne!(a.node_id, b.node_id);
    }

    #[test]
    fn handshake_defaults_snapshot() {
        let rendered = toml::to_string(&HandshakeSection::default()).unwrap();
        insta::assert_snapshot!(rendered, @r"
        timeout_ms = 10000
        role_change_timeout_ms = 5000
        ");
    }
}
