//! Server configuration management.
//!
//! Configuration is stored as TOML, either at the path given with `-c` or at
//! `~/.config/pigeon/content-server.toml`. A default file is written on
//! first start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pigeon_content::{
    CategoryPolicy, CategoryRule, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE, TransferConfig,
    default_categories,
};
use pigeon_protocol::constants::WS_MAX_MESSAGE_SIZE;
use pigeon_server::ServerConfig;
use serde::{Deserialize, Serialize};

/// Content server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base directory for relative category directories.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Token clients present in `hello`. Empty disables the handshake.
    #[serde(default)]
    pub access_token: String,

    /// Bytes per download chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Unacknowledged download bytes allowed in flight.
    #[serde(default = "default_window_size")]
    pub window_size: u64,

    #[serde(default = "default_timeout_ms")]
    pub upload_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub download_timeout_ms: u64,

    /// Largest accepted WebSocket message.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Content categories by name.
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, CategoryRule>,
}

fn default_port() -> u16 {
    4000
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_window_size() -> u64 {
    DEFAULT_WINDOW_SIZE
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage_root: default_storage_root(),
            access_token: String::new(),
            chunk_size: default_chunk_size(),
            window_size: default_window_size(),
            upload_timeout_ms: default_timeout_ms(),
            download_timeout_ms: default_timeout_ms(),
            max_message_size: default_max_message_size(),
            categories: default_categories(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the default location), writing
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The access token lives here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.categories.is_empty() {
            anyhow::bail!("at least one content category is required");
        }
        if self.chunk_size == 0 || self.window_size == 0 {
            anyhow::bail!("chunk_size and window_size must be positive");
        }
        // A download chunk travels in one binary message.
        if self.chunk_size >= self.max_message_size {
            anyhow::bail!(
                "chunk_size ({}) must be smaller than max_message_size ({})",
                self.chunk_size,
                self.max_message_size
            );
        }
        Ok(())
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_size,
            window_size: self.window_size,
            upload_timeout: Duration::from_millis(self.upload_timeout_ms),
            download_timeout: Duration::from_millis(self.download_timeout_ms),
        }
    }

    pub fn policy(&self) -> CategoryPolicy {
        CategoryPolicy::new(self.storage_root.clone(), self.categories.clone())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            max_message_size: self.max_message_size,
        }
    }
}

/// Returns the default configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
            .join("pigeon")
            .join("content-server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("pigeon")
            .join("content-server.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, 4000);
        assert_eq!(config.storage_root, PathBuf::from("."));
        assert!(config.access_token.is_empty());
        assert_eq!(config.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.upload_timeout_ms, 5000);
        assert!(config.categories.contains_key("image"));
        assert!(config.categories.contains_key("binary"));
        config.validate().unwrap();
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            port: 8888,
            access_token: "secret".into(),
            window_size: 4 * 1024 * 1024,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            port = 9000

            [categories.audio]
            extensions = ["ogg", "mp3"]
            dir = "audioContents"
            max_size = 1048576
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.download_timeout_ms, 5000);
        assert_eq!(config.categories.len(), 1);
        assert!(!config.categories["audio"].thumbnails);
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("pigeon"));
    }

    #[test]
    fn load_writes_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("content-server.toml");

        let created = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());

        std::fs::write(&path, "chunk_size = 100\nmax_message_size = 50\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn derived_configs() {
        let config = Config {
            storage_root: PathBuf::from("/srv/pigeon"),
            upload_timeout_ms: 1500,
            ..Config::default()
        };
        assert_eq!(
            config.transfer_config().upload_timeout,
            Duration::from_millis(1500)
        );
        let policy = config.policy();
        let image = policy.rule("image").unwrap();
        assert_eq!(
            policy.dir_of(image),
            PathBuf::from("/srv/pigeon/imageContents")
        );
        assert_eq!(config.server_config().port, 4000);
    }
}
