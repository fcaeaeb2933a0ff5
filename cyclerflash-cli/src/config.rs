//! Configuration file support for cyclerflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CYCLERFLASH_*)
//! 3. Local config file (./cyclerflash.toml)
//! 4. Global config file (~/.config/cyclerflash/config.toml)

use clap::ValueEnum;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "cyclerflash.toml";

/// Upload strategy selectable from the command line or config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// YMODEM blocks with CRC and acknowledgements.
    Ymodem,
    /// Fixed-size writes with a pause, no acknowledgement.
    Chunked,
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Default strategy.
    pub strategy: Option<StrategyKind>,
    /// YMODEM block size (128 or 1024).
    pub block_size: Option<usize>,
    /// Chunked writer chunk size.
    pub chunk_size: Option<usize>,
    /// Chunked writer pause between chunks, in milliseconds.
    pub delay_ms: Option<u64>,
    /// YMODEM attempts per block.
    pub max_retries: Option<u32>,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the instrument's storage card.
    pub root: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cyclerflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        let upload = other.upload;
        if upload.strategy.is_some() {
            self.upload.strategy = upload.strategy;
        }
        if upload.block_size.is_some() {
            self.upload.block_size = upload.block_size;
        }
        if upload.chunk_size.is_some() {
            self.upload.chunk_size = upload.chunk_size;
        }
        if upload.delay_ms.is_some() {
            self.upload.delay_ms = upload.delay_ms;
        }
        if upload.max_retries.is_some() {
            self.upload.max_retries = upload.max_retries;
        }

        if other.storage.root.is_some() {
            self.storage.root = other.storage.root;
        }
    }

    /// Remember `port` as the preferred serial port.
    ///
    /// Written to the local config when one exists, otherwise to the global one.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<PathBuf> {
        self.connection.port = Some(port.to_string());

        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        self.save_to(&path)?;
        info!("Saved port {port} to {}", path.display());
        Ok(path)
    }

    /// Write this configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.upload.strategy.is_none());
        assert!(config.upload.block_size.is_none());
        assert!(config.storage.root.is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_port() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyUSB0".to_string());
        other.upload.strategy = Some(StrategyKind::Chunked);

        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.upload.strategy, Some(StrategyKind::Chunked));
    }

    #[test]
    fn test_config_merge_baud() {
        let mut base = Config::default();
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.baud = Some(115200);

        base.merge(other);
        assert_eq!(base.connection.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.upload.chunk_size = Some(512);
        base.storage.root = Some(PathBuf::from("/media/sd"));

        let other = Config::default(); // all None
        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.upload.chunk_size, Some(512));
        assert_eq!(base.storage.root, Some(PathBuf::from("/media/sd")));
    }

    #[test]
    fn test_config_merge_upload_fields() {
        let mut base = Config::default();
        base.upload.block_size = Some(1024);
        base.upload.max_retries = Some(10);

        let mut other = Config::default();
        other.upload.block_size = Some(128);
        other.upload.delay_ms = Some(20);

        base.merge(other);
        assert_eq!(base.upload.block_size, Some(128));
        assert_eq!(base.upload.delay_ms, Some(20));
        assert_eq!(base.upload.max_retries, Some(10));
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyUSB0"
baud = 115200

[upload]
strategy = "chunked"
block_size = 128
chunk_size = 256
delay_ms = 100
max_retries = 5

[storage]
root = "/media/EASYPCR"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.upload.strategy, Some(StrategyKind::Chunked));
        assert_eq!(config.upload.block_size, Some(128));
        assert_eq!(config.upload.chunk_size, Some(256));
        assert_eq!(config.upload.delay_ms, Some(100));
        assert_eq!(config.upload.max_retries, Some(5));
        assert_eq!(config.storage.root, Some(PathBuf::from("/media/EASYPCR")));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
        assert!(config.upload.strategy.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_strategy() {
        let result: Result<Config, _> = toml::from_str("[upload]\nstrategy = \"xmodem\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.port = Some("COM3".to_string());
        config.connection.baud = Some(57600);
        config.upload.strategy = Some(StrategyKind::Ymodem);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.connection.port.as_deref(), Some("COM3"));
        assert_eq!(deserialized.connection.baud, Some(57600));
        assert_eq!(deserialized.upload.strategy, Some(StrategyKind::Ymodem));
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("test_config.toml");
        fs::write(
            &path,
            r#"
[connection]
port = "/dev/ttyUSB1"
[upload]
strategy = "ymodem"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.upload.strategy, Some(StrategyKind::Ymodem));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "[connection\nport = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        // Should return default
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_save_to_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("saved.toml");
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM0".to_string());
        config.storage.root = Some(PathBuf::from("E:/"));

        config
            .save_to(&path)
            .unwrap();
        let loaded = Config::load_from_path(&path);

        assert_eq!(loaded.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(loaded.storage.root, Some(PathBuf::from("E:/")));
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_is_some() {
        // On most systems this should return Some
        let path = Config::global_config_path();
        if let Some(p) = path {
            assert!(p.to_str().unwrap().contains("cyclerflash"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
