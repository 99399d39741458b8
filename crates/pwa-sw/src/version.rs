//! Deployment identity: version, cache store name and resolved manifest.

use pwa_common::AgentConfig;
use pwa_net::request_key;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Everything one worker agent instance knows about its own deployment.
///
/// Derived purely from configuration, so install and activate compute the
/// same cache name without sharing runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Version string as configured.
    pub version: String,

    /// Major component of the version.
    pub major: u64,

    /// Name of the cache store owned by this version.
    pub cache_name: String,

    /// Absolute URLs that must be cached before install completes.
    pub manifest: Vec<Url>,
}

impl Deployment {
    /// Resolve an agent configuration against the origin it serves.
    pub fn resolve(config: &AgentConfig, origin: &Url) -> Result<Self> {
        let major = config.major_version()?;
        let cache_name = config.cache_name()?;

        let manifest = config
            .manifest
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| {
                    ServiceWorkerError::ScriptError(format!("manifest path {path:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version: config.version.clone(),
            major,
            cache_name,
            manifest,
        })
    }

    /// Cache keys the manifest will populate.
    pub fn manifest_keys(&self) -> Vec<String> {
        self.manifest.iter().map(request_key).collect()
    }

    /// Whether `cache_name` belongs to this deployment.
    pub fn owns_cache(&self, cache_name: &str) -> bool {
        self.cache_name == cache_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[test]
    fn test_resolve_default_config() {
        let deployment = Deployment::resolve(&AgentConfig::default(), &origin()).unwrap();

        assert_eq!(deployment.major, 1);
        assert_eq!(deployment.cache_name, "pwa-static-1");
        assert_eq!(deployment.manifest.len(), 6);
        assert_eq!(deployment.manifest[0].as_str(), "https://app.example/");
        assert!(deployment.owns_cache("pwa-static-1"));
        assert!(!deployment.owns_cache("pwa-static-0"));
    }

    #[test]
    fn test_minor_bump_keeps_cache_name() {
        let v1 = AgentConfig::default();
        let v1_1 = AgentConfig {
            version: "1.1.0".to_string(),
            ..AgentConfig::default()
        };

        let a = Deployment::resolve(&v1, &origin()).unwrap();
        let b = Deployment::resolve(&v1_1, &origin()).unwrap();

        assert_eq!(a.cache_name, b.cache_name);
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_version_is_script_error() {
        let config = AgentConfig {
            version: "next".to_string(),
            ..AgentConfig::default()
        };
        let result = Deployment::resolve(&config, &origin());
        assert!(matches!(result, Err(ServiceWorkerError::ScriptError(_))));
    }

    #[test]
    fn test_manifest_keys() {
        let config = AgentConfig {
            manifest: vec!["/a.css".into(), "/b.js".into()],
            ..AgentConfig::default()
        };
        let deployment = Deployment::resolve(&config, &origin()).unwrap();

        assert_eq!(
            deployment.manifest_keys(),
            vec!["https://app.example/a.css", "https://app.example/b.js"]
        );
    }
}
