use crate::EngineError;
use dockhand_schema::ImageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=value` entries, in the order the container should see them.
    pub env: Vec<String>,
    /// `source:target:mode` bind or volume mounts.
    pub volumes: Vec<String>,
    /// Published ports in engine syntax, e.g. `8080:80/tcp`.
    pub ports: Vec<String>,
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Exited(i64),
}

impl ContainerStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Exited(code) => write!(f, "exited({code})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub env: Vec<String>,
    pub mounts: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Runtime configuration recorded into a committed or flattened image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfig {
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// `port/protocol` entries, e.g. `80/tcp`.
    pub exposed_ports: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageConfig {
    /// Dockerfile-style instructions equivalent to this configuration.
    pub fn to_changes(&self) -> Vec<String> {
        let mut changes = Vec::new();
        if let Some(cmd) = &self.command {
            changes.push(format!("CMD {}", json_array(cmd)));
        }
        if let Some(entrypoint) = &self.entrypoint {
            changes.push(format!("ENTRYPOINT {}", json_array(entrypoint)));
        }
        for entry in &self.env {
            if let Some((k, v)) = entry.split_once('=') {
                changes.push(format!("ENV {k}={}", json_string(v)));
            }
        }
        if let Some(dir) = &self.working_dir {
            changes.push(format!("WORKDIR {dir}"));
        }
        for port in &self.exposed_ports {
            changes.push(format!("EXPOSE {port}"));
        }
        for (k, v) in &self.labels {
            changes.push(format!("LABEL {k}={}", json_string(v)));
        }
        changes
    }
}

fn json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_owned())
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

/// Capability interface over a container engine.
///
/// Containers are addressed by name. Implementations must be safe to call
/// from several threads at once; the engine itself serializes conflicting
/// operations on one container.
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Create (but do not start) a container. Returns the engine's container id.
    fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    fn start(&self, name: &str) -> Result<(), EngineError>;

    /// Block until the container exits and return its exit code.
    fn wait(&self, name: &str) -> Result<i64, EngineError>;

    /// Output the container has produced so far.
    fn logs(&self, name: &str) -> Result<String, EngineError>;

    /// Graceful stop: terminate, then kill once `grace` has elapsed.
    fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError>;

    /// Immediate kill, no grace period.
    fn kill(&self, name: &str) -> Result<(), EngineError>;

    /// Remove the container and its anonymous volumes, stopping it first if needed.
    fn remove(&self, name: &str) -> Result<(), EngineError>;

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError>;

    /// All containers whose name starts with `{namespace}_`.
    fn list(&self, namespace: &str) -> Result<Vec<ContainerInfo>, EngineError>;

    /// Commit the container filesystem as a new layer on top of its image.
    fn commit(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError>;

    /// Export the container filesystem and import it as a single-layer image.
    fn flatten(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError>;

    fn tag(&self, image: &ImageId, repository: &str, tag: &str) -> Result<(), EngineError>;

    /// Drop one `repository:tag` reference, leaving the image itself alone
    /// while other references remain.
    fn untag(&self, reference: &str) -> Result<(), EngineError>;

    fn remove_image(&self, image: &ImageId) -> Result<(), EngineError>;

    fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;
}

/// Select an engine by name. `state_file` persists the mock engine between invocations.
pub fn select_engine(
    name: &str,
    state_file: Option<&Path>,
) -> Result<Box<dyn ContainerEngine>, EngineError> {
    match name {
        "docker" => Ok(Box::new(crate::docker::DockerEngine::new())),
        "mock" => Ok(Box::new(match state_file {
            Some(path) => crate::mock::MockEngine::persistent(path),
            None => crate::mock::MockEngine::new(),
        })),
        other => Err(EngineError::Unavailable(format!("unknown engine '{other}'"))),
    }
}
