// SPDX-License-Identifier: Apache-2.0
//! Runtime configuration for DagVault services (ambient stack — no
//! corresponding spec.md module, but every other crate here needs a place
//! to read its connection string, compaction threshold, and cache TTLs
//! from).
//!
//! Generalizes `echo-app-core::config`'s `ConfigStore`/`ConfigService<S>`
//! split (storage port vs. typed load/save) from a viewer-preferences blob
//! into [`DagVaultConfig`], and follows the donor workspace's env-override-
//! over-file pattern (`examples/EffortlessMetrics-agent-backplane/crates/
//! abp-config::load_config`) rather than reaching for a config-merging
//! crate.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors raised while loading or persisting [`DagVaultConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested config file does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file's contents were not valid TOML for this shape.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Underlying parse error description.
        reason: String,
    },
    /// I/O error while reading or writing the config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level runtime settings for a DagVault process.
///
/// Every field has a default so a fresh deployment can start with no
/// config file at all — `load` persists the resolved defaults back to
/// disk the first time it runs with no file present, the same
/// load-then-persist-defaults behavior `echo-session-service::main`
/// applies to its own `FsConfigStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DagVaultConfig {
    /// Postgres connection string for `dagvault-store`.
    pub database_url: String,
    /// Maximum number of pooled Postgres connections.
    pub max_db_connections: u32,
    /// Default patch-chain depth at which compaction becomes eligible
    /// (spec §4.7's "depth >= configurable threshold, default 20").
    pub compaction_depth_threshold: i32,
    /// Cache-hit-rate threshold (0.0-1.0) that also triggers eligibility.
    pub compaction_cache_hit_threshold: f64,
    /// Time-to-live, in seconds, for the `ir:{run_id}` and
    /// `context:{run_id}` ephemeral caches (spec §6).
    pub ephemeral_cache_ttl_secs: u64,
    /// Listen address for the HTTP/gRPC-equivalent request handler
    /// (spec §5's "per-request context"); out of scope to actually bind,
    /// recorded here for whatever transport layer wires this crate in.
    pub listen_addr: String,
    /// Log level passed to `tracing-subscriber`'s `EnvFilter`.
    pub log_level: String,
}

impl Default for DagVaultConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/dagvault".to_string(),
            max_db_connections: 10,
            compaction_depth_threshold: 20,
            compaction_cache_hit_threshold: 0.8,
            ephemeral_cache_ttl_secs: 300,
            listen_addr: "0.0.0.0:7420".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Recognized environment-variable overrides, applied on top of whatever
/// was loaded from a file (or the defaults, if no file was given).
const ENV_DATABASE_URL: &str = "DAGVAULT_DATABASE_URL";
const ENV_MAX_DB_CONNECTIONS: &str = "DAGVAULT_MAX_DB_CONNECTIONS";
const ENV_COMPACTION_DEPTH_THRESHOLD: &str = "DAGVAULT_COMPACTION_DEPTH_THRESHOLD";
const ENV_COMPACTION_CACHE_HIT_THRESHOLD: &str = "DAGVAULT_COMPACTION_CACHE_HIT_THRESHOLD";
const ENV_EPHEMERAL_CACHE_TTL_SECS: &str = "DAGVAULT_EPHEMERAL_CACHE_TTL_SECS";
const ENV_LISTEN_ADDR: &str = "DAGVAULT_LISTEN_ADDR";
const ENV_LOG_LEVEL: &str = "DAGVAULT_LOG_LEVEL";

/// Apply recognized `DAGVAULT_*` environment variables on top of
/// `config`, ignoring any that are unset or fail to parse for their
/// field's type.
pub fn apply_env_overrides(config: &mut DagVaultConfig) {
    if let Ok(val) = std::env::var(ENV_DATABASE_URL) {
        config.database_url = val;
    }
    if let Some(val) = parsed_env(ENV_MAX_DB_CONNECTIONS) {
        config.max_db_connections = val;
    }
    if let Some(val) = parsed_env(ENV_COMPACTION_DEPTH_THRESHOLD) {
        config.compaction_depth_threshold = val;
    }
    if let Some(val) = parsed_env(ENV_COMPACTION_CACHE_HIT_THRESHOLD) {
        config.compaction_cache_hit_threshold = val;
    }
    if let Some(val) = parsed_env(ENV_EPHEMERAL_CACHE_TTL_SECS) {
        config.ephemeral_cache_ttl_secs = val;
    }
    if let Ok(val) = std::env::var(ENV_LISTEN_ADDR) {
        config.listen_addr = val;
    }
    if let Ok(val) = std::env::var(ENV_LOG_LEVEL) {
        config.log_level = val;
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Parse a TOML string into a [`DagVaultConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML for
/// this shape.
pub fn parse_toml(content: &str) -> Result<DagVaultConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Load configuration: read `path` if given (error if it does not exist),
/// otherwise start from [`DagVaultConfig::default`]; apply environment
/// overrides on top either way.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is `Some` and does not
/// exist, or [`ConfigError::ParseError`] if its contents do not parse.
pub fn load(path: Option<&Path>) -> Result<DagVaultConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => DagVaultConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load configuration from `path`, persisting the resolved defaults back
/// to it first if no file exists there yet. Environment overrides are
/// applied to the in-memory result but never written back.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be created or written,
/// or [`ConfigError::ParseError`] if an existing file fails to parse.
pub fn load_or_persist_defaults(path: &Path) -> Result<DagVaultConfig, ConfigError> {
    if !path.exists() {
        let defaults = DagVaultConfig::default();
        let serialized = toml::to_string_pretty(&defaults).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serialized)?;
    }
    load(Some(path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let defaults = DagVaultConfig::default();
        let serialized = toml::to_string(&defaults).unwrap();
        let parsed = parse_toml(&serialized).unwrap();
        assert_eq!(parsed.database_url, defaults.database_url);
        assert_eq!(parsed.compaction_depth_threshold, defaults.compaction_depth_threshold);
    }

    #[test]
    fn load_none_returns_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.listen_addr, DagVaultConfig::default().listen_addr);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load(Some(Path::new("/nonexistent/dagvault.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_or_persist_defaults_writes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dagvault.toml");
        assert!(!path.exists());

        let first = load_or_persist_defaults(&path).unwrap();
        assert!(path.exists());
        assert_eq!(first.compaction_depth_threshold, 20);

        // Mutate the on-disk file, then confirm a second load reads it
        // back rather than re-persisting defaults.
        std::fs::write(&path, "compaction_depth_threshold = 99\n").unwrap();
        let second = load_or_persist_defaults(&path).unwrap();
        assert_eq!(second.compaction_depth_threshold, 99);
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var(ENV_LISTEN_ADDR, "127.0.0.1:9999");
        let mut config = DagVaultConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        std::env::remove_var(ENV_LISTEN_ADDR);
    }
}
