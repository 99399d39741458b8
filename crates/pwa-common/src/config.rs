//! Agent configuration
//!
//! The deployment version is injected here and read once when a worker agent
//! is built. Defaults mirror the shipped app shell.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{PwaError, Result};

/// Environment variable overriding [`AgentConfig::version`].
pub const ENV_VERSION: &str = "PWA_VERSION";

/// Environment variable overriding [`PwaConfig::origin`].
pub const ENV_ORIGIN: &str = "PWA_ORIGIN";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwaConfig {
    /// Origin the app shell is served from.
    pub origin: Url,

    /// Worker agent settings.
    pub agent: AgentConfig,

    /// Page controller settings.
    pub page: PageConfig,

    /// Network settings for manifest fetches.
    pub network: NetworkConfig,
}

/// Settings baked into one deployment of the worker agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Semantic version string of the deployment.
    pub version: String,

    /// Prefix of the versioned cache store name.
    pub cache_prefix: String,

    /// Paths that must be cached before the version counts as installed.
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Path of the worker script to register.
    pub script_path: String,

    /// Send the activate message as soon as an update is available.
    pub auto_apply_updates: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for PwaConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin is valid"),
            agent: AgentConfig::default(),
            page: PageConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            cache_prefix: "pwa-static-".to_string(),
            manifest: [
                "/",
                "/manifest.webmanifest",
                "/icon-192.png",
                "/icon-512.png",
                "/css/stylesheet.css",
                "/javascript/app.js",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            script_path: "/serviceWorker.js".to_string(),
            auto_apply_updates: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("pwa-offline/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AgentConfig {
    /// Major component of the version string.
    ///
    /// Reads the leading integer like `parseInt(v, 10)`: `"1.0.0"` is 1,
    /// `"2-beta"` is 2, `"beta"` is rejected.
    pub fn major_version(&self) -> Result<u64> {
        parse_major(&self.version)
    }

    /// Name of the cache store owned by this version.
    pub fn cache_name(&self) -> Result<String> {
        Ok(format!("{}{}", self.cache_prefix, self.major_version()?))
    }

    /// Check the version parses and the manifest is well formed.
    pub fn validate(&self) -> Result<()> {
        self.major_version()?;

        if self.cache_prefix.is_empty() {
            return Err(PwaError::config("agent.cache_prefix must not be empty"));
        }
        if self.manifest.is_empty() {
            return Err(PwaError::config("agent.manifest must list at least one path"));
        }

        let mut seen = HashSet::new();
        for path in &self.manifest {
            if !path.starts_with('/') {
                return Err(PwaError::config(format!(
                    "manifest path {path:?} must start with '/'"
                )));
            }
            if !seen.insert(path.as_str()) {
                return Err(PwaError::config(format!("duplicate manifest path {path:?}")));
            }
        }
        Ok(())
    }
}

impl PwaConfig {
    /// Parse configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PwaError::config_with_source(format!("reading {}", path.display()), e)
        })?;

        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(version) = lookup(ENV_VERSION) {
            self.agent.version = version;
        }
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = Url::parse(&origin)?;
        }
        Ok(())
    }

    /// Check the configuration for values the agent cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(PwaError::config(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }
        if !self.page.script_path.starts_with('/') {
            return Err(PwaError::config("page.script_path must start with '/'"));
        }
        if self.network.timeout_secs == 0 {
            return Err(PwaError::config("network.timeout_secs must be positive"));
        }
        self.agent.validate()
    }

    /// Absolute URL of the worker script.
    pub fn script_url(&self) -> Result<Url> {
        Ok(self.origin.join(&self.page.script_path)?)
    }
}

fn parse_major(version: &str) -> Result<u64> {
    let trimmed = version.trim_start();
    let digits: &str = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);

    digits
        .parse::<u64>()
        .map_err(|_| PwaError::InvalidVersion(version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_cache_name() {
        let config = AgentConfig::default();
        assert_eq!(config.major_version().unwrap(), 1);
        assert_eq!(config.cache_name().unwrap(), "pwa-static-1");
    }

    #[test]
    fn test_major_version_parsing() {
        assert_eq!(parse_major("12.4.1").unwrap(), 12);
        assert_eq!(parse_major("2-beta").unwrap(), 2);
        assert_eq!(parse_major("  3").unwrap(), 3);
        assert!(matches!(parse_major("beta"), Err(PwaError::InvalidVersion(_))));
        assert!(parse_major("").is_err());
    }

    #[test]
    fn test_default_manifest() {
        let config = AgentConfig::default();
        assert_eq!(config.manifest.len(), 6);
        assert_eq!(config.manifest[0], "/");
        assert_eq!(config.manifest[5], "/javascript/app.js");
    }

    #[test]
    fn test_default_config_validates() {
        assert!(PwaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = PwaConfig::from_json_str(
            r#"{ "origin": "https://app.example/", "agent": { "version": "4.2.0" } }"#,
        )
        .unwrap();

        assert_eq!(config.origin.as_str(), "https://app.example/");
        assert_eq!(config.agent.cache_name().unwrap(), "pwa-static-4");
        assert_eq!(config.page.script_path, "/serviceWorker.js");
    }

    #[test]
    fn test_rejects_duplicate_manifest_paths() {
        let result = PwaConfig::from_json_str(r#"{ "agent": { "manifest": ["/a", "/a"] } }"#);
        assert!(matches!(result, Err(PwaError::Config { .. })));
    }

    #[test]
    fn test_rejects_relative_manifest_path() {
        let result = PwaConfig::from_json_str(r#"{ "agent": { "manifest": ["a.css"] } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_http_origin() {
        let result = PwaConfig::from_json_str(r#"{ "origin": "file:///tmp/" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = PwaConfig::default();
        config
            .apply_overrides(|key| match key {
                ENV_VERSION => Some("7.0.0".to_string()),
                ENV_ORIGIN => Some("https://override.example/".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.agent.cache_name().unwrap(), "pwa-static-7");
        assert_eq!(config.origin.host_str(), Some("override.example"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "page": {{ "auto_apply_updates": true }} }}"#).unwrap();

        let config = PwaConfig::load(file.path()).unwrap();
        assert!(config.page.auto_apply_updates);
        assert_eq!(
            config.script_url().unwrap().as_str(),
            "http://localhost:8080/serviceWorker.js"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = PwaConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(PwaError::Config { .. })));
    }
}
