//! Configuration handling for the reader daemon (spec.md §6, SPEC_FULL.md
//! A.3): a JSON file layered with `VAULTAIRE_`-prefixed environment
//! variables, in the same `config::Config::builder()` shape the teacher's
//! `config.rs` uses, with a `Default` impl supplying every value spec.md's
//! CLI surface names as having one.

use config::Config;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::VaultaireError;
use crate::store::LOCK_TIMEOUT;

/// Default locations searched when no `--config` path is given, checked
/// in order; the first one that exists wins.
const CONFIG_LOCATIONS: &[&str] = &["./vaultaire-reader.json", "/etc/vaultaire/reader.json"];

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// The daemon's resolved configuration blob: everything the supervisor,
/// store adapter and router I/O need besides what the CLI overrides
/// per-invocation (debug, workers, the broker hostname).
pub struct ConfigFile {
    /// RADOS pool holding the bucket objects (spec.md §6).
    pub pool: String,
    /// RADOS user to connect as (spec.md §6).
    pub user: String,
    /// Path to the Ceph client config file (spec.md §6).
    pub ceph_config_path: String,
    /// Filesystem directory the object store adapter keeps its objects
    /// under in this build (see `store`'s module doc comment).
    pub object_store_dir: String,
    /// Broker hostname the router/contents/telemetry sockets connect to.
    /// Usually supplied positionally on the CLI; kept here too so a
    /// config file alone is enough to run the daemon.
    pub broker: String,
    /// Mirrors `--debug`: raises the log level and echoes telemetry to
    /// stdout (spec.md §4.8 task 1).
    pub debug: bool,
    /// Lock lease watchdog timeout in seconds (spec.md §4.5, §9). Stored
    /// as seconds for JSON/env friendliness; `lock_timeout()` converts.
    pub lock_timeout_seconds: u64,
}

impl ConfigFile {
    /// Loads configuration from `config_path` if given, else the first of
    /// [`CONFIG_LOCATIONS`] that exists on disk. Falls back to
    /// [`ConfigFile::default`] if nothing is found, mirroring the
    /// teacher's `try_from` (spec.md doesn't require a config file at
    /// all: every value it names has a documented default).
    pub fn try_from(config_path: Option<&str>) -> Result<Self, std::io::Error> {
        let file_locations: Vec<String> = match config_path {
            Some(value) => vec![value.to_owned()],
            None => CONFIG_LOCATIONS.iter().map(|s| s.to_string()).collect(),
        };

        let found = file_locations.into_iter().find(|path| Path::new(path).exists());

        let Some(config_filename) = found else {
            if config_path.is_some() {
                return Err(std::io::Error::new(
                    ErrorKind::NotFound,
                    "requested config file does not exist",
                ));
            }
            return Ok(ConfigFile::default());
        };

        let builder = Config::builder()
            .add_source(config::File::new(&config_filename, config::FileFormat::Json))
            .add_source(config::Environment::with_prefix("VAULTAIRE"));

        let config = builder
            .build()
            .map_err(|e| std::io::Error::other(format!("couldn't load config from {config_filename}: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| std::io::Error::other(format!("couldn't parse config from {config_filename}: {e}")))
    }

    /// `lock_timeout_seconds` as a [`Duration`], falling back to the
    /// spec's default ([`LOCK_TIMEOUT`]) when the field was left at 0
    /// (e.g. a hand-written config file that omitted it).
    pub fn lock_timeout(&self) -> Duration {
        if self.lock_timeout_seconds == 0 {
            LOCK_TIMEOUT
        } else {
            Duration::from_secs(self.lock_timeout_seconds)
        }
    }

    pub fn as_json_pretty(&self) -> Result<String, VaultaireError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VaultaireError::ConfigError(e.to_string()))
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            pool: "vaultaire".to_string(),
            user: "vaultaire".to_string(),
            ceph_config_path: "/etc/ceph/ceph.conf".to_string(),
            object_store_dir: "/var/lib/vaultaire/objects".to_string(),
            broker: String::new(),
            debug: false,
            lock_timeout_seconds: LOCK_TIMEOUT.as_secs(),
        }
    }
}
