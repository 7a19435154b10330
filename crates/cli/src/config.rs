//! Configuration management for the CLI

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:9322";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("optctl").join("config.json"))
    }

    /// Copy of this configuration with the given values replaced
    pub fn with_overrides(mut self, api_url: Option<String>, format: Option<OutputFormat>) -> Result<Self> {
        if let Some(api_url) = api_url {
            url::Url::parse(&api_url).context("Invalid API URL")?;
            self.api_url = Some(api_url);
        }
        if let Some(format) = format {
            let name = format
                .to_possible_value()
                .map(|v| v.get_name().to_string())
                .context("Output format has no name")?;
            self.default_format = Some(name);
        }
        Ok(self)
    }

    /// Endpoint to use when neither the flag nor the environment names one
    pub fn api_url_or_default(&self) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url_or_default(), DEFAULT_API_URL);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optctl").join("config.json");
        let config = Config {
            api_url: Some("http://controller:9322".to_string()),
            default_format: Some("json".to_string()),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api_url_or_default(), "http://controller:9322");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_overrides_keep_unset_values() {
        let config = Config {
            api_url: Some("http://controller:9322".to_string()),
            default_format: None,
        };
        let updated = config
            .clone()
            .with_overrides(None, Some(OutputFormat::Json))
            .unwrap();
        assert_eq!(updated.api_url, config.api_url);
        assert_eq!(updated.default_format.as_deref(), Some("json"));

        assert!(config.with_overrides(Some("not a url".to_string()), None).is_err());
    }
}
