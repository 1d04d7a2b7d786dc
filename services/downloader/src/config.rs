//! Downloader configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `LIZARD_*` environment variables. Command line flags are applied last by
//! the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lizard_common::DEFAULT_MAX_PIXEL_COUNT;

pub const DEFAULT_BASE_URL: &str = "nens.lizard.net";
const API_SUFFIX: &str = "/api/v4/";
const WMS_SUFFIX: &str = "/wms/";

pub const ENV_BASE_URL: &str = "LIZARD_BASE_URL";
pub const ENV_API_KEY: &str = "LIZARD_API_KEY";
pub const ENV_AUTHCFG: &str = "LIZARD_AUTHCFG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Lizard host, e.g. `demo.lizard.net`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Credential reference appended to WMS layer URIs.
    #[serde(default)]
    pub authcfg: Option<String>,

    /// Delay between task status sweeps.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request pixel budget of raster exports.
    #[serde(default = "default_max_pixel_count")]
    pub max_pixel_count: u64,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Rows per search results page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    #[serde(default = "default_gdalwarp_path")]
    pub gdalwarp_path: PathBuf,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_pixel_count() -> u64 {
    DEFAULT_MAX_PIXEL_COUNT
}

fn default_max_concurrent_downloads() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    600 // 10 minutes
}

fn default_page_size() -> u64 {
    25
}

fn default_gdalwarp_path() -> PathBuf {
    PathBuf::from("gdalwarp")
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            authcfg: None,
            poll_interval_secs: default_poll_interval(),
            max_pixel_count: default_max_pixel_count(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            request_timeout_secs: default_request_timeout(),
            page_size: default_page_size(),
            gdalwarp_path: default_gdalwarp_path(),
        }
    }
}

impl DownloaderConfig {
    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DownloaderConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), base_url = %config.base_url, "Loaded downloader config");
        Ok(config)
    }

    /// Defaults, overlaid with `path` when given, then the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`; empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.api_key = Some(api_key);
        }
        if let Some(authcfg) = lookup(ENV_AUTHCFG) {
            self.authcfg = Some(authcfg);
        }
    }

    /// Host name without scheme or trailing slash.
    pub fn host(&self) -> &str {
        let host = self.base_url.trim();
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);
        host.trim_end_matches('/')
    }

    /// REST API root, ending in `/`.
    pub fn api_url(&self) -> String {
        format!("https://{}{}", self.host(), API_SUFFIX)
    }

    /// WMS root, ending in `/`.
    pub fn wms_url(&self) -> String {
        format!("https://{}{}", self.host(), WMS_SUFFIX)
    }

    pub fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!(
                "No Lizard API key configured. Set {} or `api_key` in the config file",
                ENV_API_KEY
            ),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the downloader cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host().is_empty() {
            bail!("base_url must not be empty");
        }
        if self.max_pixel_count == 0 {
            bail!("max_pixel_count must be greater than zero");
        }
        if self.max_concurrent_downloads == 0 {
            bail!("max_concurrent_downloads must be greater than zero");
        }
        if self.page_size == 0 {
            bail!("page_size must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DownloaderConfig::default();
        assert_eq!(config.api_url(), "https://nens.lizard.net/api/v4/");
        assert_eq!(config.wms_url(), "https://nens.lizard.net/wms/");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_pixel_count, 100_000_000);
        assert_eq!(config.max_concurrent_downloads, 1);
        assert_eq!(config.page_size, 25);
        assert!(config.api_key().is_err());
    }

    #[test]
    fn test_base_url_normalized() {
        let config = DownloaderConfig {
            base_url: "https://demo.lizard.net/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.host(), "demo.lizard.net");
        assert_eq!(config.api_url(), "https://demo.lizard.net/api/v4/");
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
base_url: demo.lizard.net
api_key: secret
poll_interval_secs: 2
max_pixel_count: 25000000
"#;

        let config: DownloaderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.base_url, "demo.lizard.net");
        assert_eq!(config.api_key().unwrap(), "secret");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.max_pixel_count, 25_000_000);
        // Unset fields keep their defaults.
        assert_eq!(config.request_timeout_secs, 600);
        assert_eq!(config.gdalwarp_path, PathBuf::from("gdalwarp"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config: DownloaderConfig =
            serde_yaml::from_str("base_url: demo.lizard.net\napi_key: from-file\n").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_API_KEY, "from-env"),
            (ENV_AUTHCFG, "abc1234"),
            (ENV_BASE_URL, ""),
        ]
        .into_iter()
        .collect();

        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_key().unwrap(), "from-env");
        assert_eq!(config.authcfg.as_deref(), Some("abc1234"));
        assert_eq!(config.base_url, "demo.lizard.net");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = DownloaderConfig {
            max_concurrent_downloads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
