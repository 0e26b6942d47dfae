use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// Client-side configuration: where the meter server lives and how the
/// workflow talks to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the meter server.
    pub server_url: String,
    /// Optional bearer token attached to every request.
    pub api_token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// How many samples a benchmark run requests by default.
    pub default_sample_count: usize,
    /// Directory for rolling log files.
    pub log_dir: String,
    /// Enable debug-level logging.
    pub debug_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            default_sample_count: 10,
            log_dir: "logs".to_string(),
            debug_mode: false,
        }
    }
}

/// Loads and saves the YAML client configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    client_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager rooted at the given directory, creating
    /// the directory if necessary.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            client_config_path: config_dir.join("metercal.yaml"),
            config_dir,
        })
    }

    /// Load the client configuration, falling back to defaults when the
    /// file does not exist.
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        if !self.client_config_path.exists() {
            tracing::warn!(
                "Client config file not found at {}, using defaults",
                self.client_config_path
            );
            return Ok(ClientConfig::default());
        }

        let file_contents = fs::read_to_string(&self.client_config_path)
            .with_context(|| format!("Failed to read client config: {}", self.client_config_path))?;

        let config: ClientConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse client config: {}", self.client_config_path))?;

        tracing::info!("Loaded client config from {}", self.client_config_path);
        Ok(config)
    }

    /// Save the client configuration file.
    pub fn save_client_config(&self, config: &ClientConfig) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(config)
            .context("Failed to serialize client config to YAML")?;

        fs::write(&self.client_config_path, yaml_string).with_context(|| {
            format!("Failed to write client config: {}", self.client_config_path)
        })?;

        tracing::info!("Saved client config to {}", self.client_config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let config = manager.load_client_config().unwrap();
        assert_eq!(config.server_url, "http://localhost:8000");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_load_save_round_trip() {
        let (manager, _temp_dir) = create_test_config_manager();

        let config = ClientConfig {
            server_url: "http://meter.local:9000".to_string(),
            api_token: Some("secret".to_string()),
            default_sample_count: 5,
            ..ClientConfig::default()
        };
        manager.save_client_config(&config).unwrap();

        let loaded = manager.load_client_config().unwrap();
        assert_eq!(loaded.server_url, "http://meter.local:9000");
        assert_eq!(loaded.api_token.as_deref(), Some("secret"));
        assert_eq!(loaded.default_sample_count, 5);
    }

    #[test]
    fn test_small_sample_count_is_honored() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(&manager.client_config_path, "default_sample_count: 2\n").unwrap();

        let loaded = manager.load_client_config().unwrap();
        assert_eq!(loaded.default_sample_count, 2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(
            &manager.client_config_path,
            "server_url: http://10.0.0.5:8000\n",
        )
        .unwrap();

        let loaded = manager.load_client_config().unwrap();
        assert_eq!(loaded.server_url, "http://10.0.0.5:8000");
        assert_eq!(loaded.request_timeout_secs, 30);
    }
}
