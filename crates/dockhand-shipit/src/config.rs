use crate::ShipitError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_namespace() -> String {
    "default".to_owned()
}

/// Where and as whom manifests are submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl ClusterConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            namespace: default_namespace(),
            token: None,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_owned();
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }

    /// Load config from `~/.config/dockhand/cluster.json`.
    pub fn load_default() -> Result<Self, ShipitError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ShipitError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShipitError::Config(format!("{}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| ShipitError::Config(format!("invalid cluster config: {e}")))?;
        config.url = config.url.trim_end_matches('/').to_owned();
        Ok(config)
    }
}

pub fn default_config_path() -> Result<PathBuf, ShipitError> {
    let home = std::env::var("HOME").map_err(|_| ShipitError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/dockhand/cluster.json"))
}
