//! Worker script sources.
//!
//! Loading a script yields the [`AgentConfig`] baked into that deployment.
//! A changed configuration is what the platform treats as a new version.

use std::path::PathBuf;

use async_trait::async_trait;
use hashbrown::HashMap;
use pwa_common::{AgentConfig, PwaConfig};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Where the platform fetches worker scripts from.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    /// Load the deployment configuration behind `script_url`.
    async fn load(&self, script_url: &Url) -> Result<AgentConfig>;
}

/// Scripts published in memory, keyed by URL.
#[derive(Debug, Default)]
pub struct StaticScriptSource {
    scripts: RwLock<HashMap<String, AgentConfig>>,
}

impl StaticScriptSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy `config` at `script_url`, replacing any previous deployment.
    pub async fn publish(&self, script_url: &Url, config: AgentConfig) {
        debug!(script = %script_url, version = %config.version, "Publishing worker script");
        self.scripts
            .write()
            .await
            .insert(script_url.to_string(), config);
    }

    /// Take the script offline; later loads fail.
    pub async fn withdraw(&self, script_url: &Url) -> bool {
        self.scripts
            .write()
            .await
            .remove(script_url.as_str())
            .is_some()
    }
}

#[async_trait]
impl ScriptSource for StaticScriptSource {
    async fn load(&self, script_url: &Url) -> Result<AgentConfig> {
        self.scripts
            .read()
            .await
            .get(script_url.as_str())
            .cloned()
            .ok_or_else(|| ServiceWorkerError::ScriptError(format!("no script at {script_url}")))
    }
}

/// Reads the agent section of a configuration file on every load, so
/// editing the file deploys a new version.
#[derive(Debug, Clone)]
pub struct FileScriptSource {
    path: PathBuf,
}

impl FileScriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScriptSource for FileScriptSource {
    async fn load(&self, script_url: &Url) -> Result<AgentConfig> {
        let config = PwaConfig::load(&self.path)?;
        debug!(
            script = %script_url,
            path = %self.path.display(),
            version = %config.agent.version,
            "Loaded worker script configuration"
        );
        Ok(config.agent)
    }
}
