//! Client configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use goggles_common::{GogglesError, LogConfig, RetryConfig};
use goggles_sw::{AssetManifest, CacheOptions, FetchPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Environment variable overriding [`AppConfig::base_url`].
pub const BASE_URL_ENV: &str = "GOGGLES_BASE_URL";

/// Generation tag of the deployed asset set.
pub const DEFAULT_CACHE_TAG: &str = "whisky-goggles-v1";

/// Assets every generation must hold.
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/static/css/output.css",
    "/static/js/main.js",
    "/static/manifest.json",
    "/static/icons/favicon.ico",
    "/static/icons/icon-192x192.png",
    "/static/icons/icon-512x512.png",
];

pub const DEFAULT_SCRIPT_PATH: &str = "/static/js/service-worker.js";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin of the identification server
    pub base_url: String,

    pub cache: CacheConfig,

    pub loader: LoaderSettings,

    pub log: LogSettings,

    /// Where identification results are kept between runs
    pub history_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Generation tag
    pub tag: String,

    /// Asset paths, in install order
    pub assets: Vec<String>,

    pub script_path: String,

    /// Controlled scope; the script's directory when unset
    pub scope: Option<String>,

    pub policy: FetchPolicy,

    /// Write successful network responses back into the active bucket
    pub refresh_on_network: bool,

    /// Directory holding one file per bucket
    pub store_dir: PathBuf,

    /// Per-asset timeout in seconds while installing
    pub asset_timeout_secs: Option<u64>,

    /// Attempts per asset while installing (1 = no retry)
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub user_agent: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,

    /// pretty, compact or json
    pub format: String,

    /// Filter directive, overrides `level` when set
    pub filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/".to_string(),
            cache: CacheConfig::default(),
            loader: LoaderSettings::default(),
            log: LogSettings::default(),
            history_path: app_dir(dirs::data_dir()).join("history.json"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_CACHE_TAG.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            script_path: DEFAULT_SCRIPT_PATH.to_string(),
            scope: Some("/".to_string()),
            policy: FetchPolicy::CacheFirst,
            refresh_on_network: false,
            store_dir: app_dir(dirs::cache_dir()).join("offline"),
            asset_timeout_secs: None,
            retry_attempts: 1,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            filter: None,
        }
    }
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("whisky-goggles")
}

impl AppConfig {
    /// `<config dir>/whisky-goggles/config.json`
    pub fn default_path() -> PathBuf {
        app_dir(dirs::config_dir()).join("config.json")
    }

    /// Load from `path`, falling back to defaults when the file is absent,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, GogglesError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, GogglesError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| match e {
            GogglesError::Config { message, source } => GogglesError::Config {
                message: format!("{}: {message}", path.display()),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, GogglesError> {
        serde_json::from_str(raw)
            .map_err(|e| GogglesError::config_with_source("malformed config", e))
    }

    pub fn validate(&self) -> Result<(), GogglesError> {
        self.base_url()?;
        if self.cache.tag.trim().is_empty() {
            return Err(GogglesError::config("cache.tag must not be empty"));
        }
        if self.cache.assets.is_empty() {
            return Err(GogglesError::config("cache.assets must list at least one path"));
        }
        self.log_config()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, GogglesError> {
        Url::parse(&self.base_url)
            .map_err(|e| GogglesError::config_with_source(format!("base_url '{}'", self.base_url), e))
    }

    pub fn manifest(&self) -> AssetManifest {
        AssetManifest::new(self.cache.tag.clone(), self.cache.assets.iter().cloned())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            policy: self.cache.policy,
            refresh_on_network: self.cache.refresh_on_network,
            asset_timeout: self.cache.asset_timeout_secs.map(Duration::from_secs),
            retry: RetryConfig::attempts(self.cache.retry_attempts),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.loader.timeout_secs)
    }

    pub fn log_config(&self) -> Result<LogConfig, GogglesError> {
        let mut config = LogConfig::default()
            .with_level_name(&self.log.level)?
            .with_format(self.log.format.parse()?);
        if let Some(ref filter) = self.log.filter {
            config = config.with_filter(filter.clone());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goggles_common::LogFormat;

    #[test]
    fn test_defaults_match_deployed_manifest() {
        let config = AppConfig::default();
        let manifest = config.manifest();
        assert_eq!(manifest.tag, "whisky-goggles-v1");
        assert_eq!(manifest.assets.len(), 7);
        assert_eq!(manifest.assets[0], "/");
        assert_eq!(manifest.assets[6], "/static/icons/icon-512x512.png");
        assert_eq!(config.cache.script_path, "/static/js/service-worker.js");
        assert_eq!(config.cache.policy, FetchPolicy::CacheFirst);
        assert!(!config.cache.refresh_on_network);
        assert!(config.history_path.ends_with("whisky-goggles/history.json"));
        assert!(AppConfig::default_path().ends_with("whisky-goggles/config.json"));
    }

    #[test]
    fn test_default_cache_options_do_not_retry_or_time_out() {
        let options = AppConfig::default().cache_options();
        assert_eq!(options.retry.max_attempts, 1);
        assert!(options.asset_timeout.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "base_url": "https://goggles.example/",
                "cache": { "tag": "whisky-goggles-v2", "policy": "network-first", "retry_attempts": 3 },
                "log": { "format": "json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url().unwrap().host_str(), Some("goggles.example"));
        assert_eq!(config.cache.tag, "whisky-goggles-v2");
        assert_eq!(config.cache.policy, FetchPolicy::NetworkFirst);
        assert_eq!(config.cache.assets.len(), 7);
        assert_eq!(config.cache_options().retry.max_attempts, 3);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log_config().unwrap().format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = AppConfig::from_json("{ \"cache\": ").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.cache.tag = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.log.format = "yaml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goggles.json");
        std::fs::write(&path, r#"{ "cache": { "asset_timeout_secs": 5 } }"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_options().asset_timeout, Some(Duration::from_secs(5)));

        let missing = AppConfig::from_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(GogglesError::Io(_))));

        std::fs::write(&path, "not json").unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("goggles.json"));
    }
}
