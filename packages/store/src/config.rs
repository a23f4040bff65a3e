use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "mapsync.config.json";

/// Store configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory holding one snapshot file per document
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Seconds between periodic saves of dirty documents
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,

    /// Gzip level for snapshots, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_save_interval_secs() -> u64 {
    60
}

fn default_compression_level() -> u32 {
    6
}

impl StoreConfig {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: StoreConfig = serde_json::from_str(&content)?;
            if config.save_interval_secs == 0 {
                anyhow::bail!("saveIntervalSecs must be at least 1");
            }
            Ok(config)
        } else {
            Ok(StoreConfig::default())
        }
    }

    /// Get absolute path to the data directory
    pub fn get_data_dir(&self, cwd: &str) -> PathBuf {
        PathBuf::from(cwd).join(&self.data_dir)
    }

    pub fn compression(&self) -> Compression {
        Compression::new(self.compression_level.min(9))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            save_interval_secs: default_save_interval_secs(),
            compression_level: default_compression_level(),
        }
    }
}
