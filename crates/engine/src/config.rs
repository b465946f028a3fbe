//! Engine configuration
//!
//! Knobs resolve in three layers: built-in defaults, an optional
//! `entitydb.toml` in the data directory, then environment variables.
//! The server layer re-reads the same variables for its own settings;
//! the engine recognizes `DATA_PATH`, `DURABILITY`, `CACHE_SOFT_MB`,
//! and `CACHE_HARD_MB`.

use entitydb_core::limits::TEMPORAL_RAM_CAP;
use entitydb_core::{DbResult, EntityDbError};
use entitydb_index::{PressureLimits, DEFAULT_CACHE_CAPACITY};
use entitydb_storage::{DurabilityMode, DEFAULT_DICT_CAPACITY, DEFAULT_WAL_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the unified file inside the data directory
pub const STORE_FILE_NAME: &str = "entities.edb";

/// Name of the optional config file inside the data directory
pub const CONFIG_FILE_NAME: &str = "entitydb.toml";

/// Engine-level configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory holding the unified file
    pub data_path: PathBuf,
    /// WAL durability level
    pub durability: DurabilityMode,
    /// Reserved WAL region size in bytes
    pub wal_capacity: u64,
    /// Reserved dictionary region size in bytes
    pub dict_capacity: u64,
    /// Entity cache capacity (entities)
    pub cache_capacity: usize,
    /// Memory pressure thresholds
    pub pressure: PressureLimits,
    /// Per-entity temporal events kept in RAM
    pub temporal_ram_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_path: PathBuf::from("./data"),
            durability: DurabilityMode::default(),
            wal_capacity: DEFAULT_WAL_CAPACITY,
            dict_capacity: DEFAULT_DICT_CAPACITY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            pressure: PressureLimits::default(),
            temporal_ram_cap: TEMPORAL_RAM_CAP,
        }
    }
}

/// The serializable subset that lives in `entitydb.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Durability mode: `"fsync"`, `"group"`, or `"none"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability: Option<String>,
    /// Entity cache capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<usize>,
    /// Soft memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_soft_mb: Option<u64>,
    /// Hard memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hard_mb: Option<u64>,
}

impl EngineConfig {
    /// Path of the unified file
    pub fn file_path(&self) -> PathBuf {
        self.data_path.join(STORE_FILE_NAME)
    }

    /// Apply `entitydb.toml` from the data directory, if present
    pub fn apply_config_file(mut self) -> DbResult<Self> {
        let path = self.data_path.join(CONFIG_FILE_NAME);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(self);
        };
        let file: ConfigFile = toml::from_str(&content).map_err(|e| {
            EntityDbError::malformed(format!("failed to parse {}: {}", path.display(), e))
        })?;
        if let Some(d) = &file.durability {
            self.durability = DurabilityMode::parse(d)?;
        }
        if let Some(c) = file.cache_capacity {
            self.cache_capacity = c;
        }
        if let Some(mb) = file.cache_soft_mb {
            self.pressure.soft_bytes = mb * 1024 * 1024;
        }
        if let Some(mb) = file.cache_hard_mb {
            self.pressure.hard_bytes = mb * 1024 * 1024;
        }
        Ok(self)
    }

    /// Apply recognized environment variables on top
    pub fn apply_env(mut self) -> DbResult<Self> {
        if let Ok(path) = std::env::var("DATA_PATH") {
            self.data_path = PathBuf::from(path);
        }
        if let Ok(d) = std::env::var("DURABILITY") {
            self.durability = DurabilityMode::parse(&d)?;
        }
        if let Ok(mb) = std::env::var("CACHE_SOFT_MB") {
            self.pressure.soft_bytes = parse_mb("CACHE_SOFT_MB", &mb)?;
        }
        if let Ok(mb) = std::env::var("CACHE_HARD_MB") {
            self.pressure.hard_bytes = parse_mb("CACHE_HARD_MB", &mb)?;
        }
        Ok(self)
    }

    /// Convenience: defaults, then config file, then environment
    ///
    /// `DATA_PATH` is resolved first so the config file is looked up in
    /// the directory that will actually be used.
    pub fn load(data_path: impl AsRef<Path>) -> DbResult<Self> {
        let mut config = EngineConfig {
            data_path: data_path.as_ref().to_path_buf(),
            ..Default::default()
        };
        if let Ok(path) = std::env::var("DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }
        config.apply_config_file()?.apply_env()
    }
}

fn parse_mb(name: &str, value: &str) -> DbResult<u64> {
    let mb: u64 = value
        .parse()
        .map_err(|_| EntityDbError::malformed(format!("{} must be a number, got '{}'", name, value)))?;
    Ok(mb * 1024 * 1024)
}
