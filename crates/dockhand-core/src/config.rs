use crate::CoreError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Optional per-project settings file, looked up in the provisioning root.
pub const SETTINGS_FILE_NAME: &str = "dockhand.toml";

pub const DEFAULT_CONDUCTOR_IMAGE: &str = "ansible/ansible-container-builder:latest";
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub conductor_image: String,
    pub engine_socket: String,
    pub stop_timeout_secs: u64,
    /// Overrides the container namespace derived from the provisioning directory.
    pub namespace: Option<String>,
    /// Engine used when none is given on the command line.
    pub engine: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conductor_image: DEFAULT_CONDUCTOR_IMAGE.to_owned(),
            engine_socket: DEFAULT_ENGINE_SOCKET.to_owned(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            namespace: None,
            engine: None,
        }
    }
}

impl Settings {
    /// Load `dockhand.toml` from `provisioning_root`, falling back to defaults when absent.
    pub fn load(provisioning_root: &Path) -> Result<Self, CoreError> {
        let path = provisioning_root.join(SETTINGS_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
