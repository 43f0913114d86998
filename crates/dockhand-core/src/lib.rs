//! Core orchestration for Dockhand projects.
//!
//! This crate drives a `ContainerEngine` on behalf of a normalized `Project`:
//! the `BuildOrchestrator` provisions and exports per-service images through
//! an ephemeral conductor container, and the `LifecycleManager` runs, stops,
//! kills, and restarts service containers with scope-aware, phase-ordered
//! concurrency. Every state transition is reported as an `Event` so callers
//! can render the same status lines the command-line tool prints.

pub mod build;
pub mod concurrency;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod scope;

pub use build::{BuildOrchestrator, BuildPlan, BuildReport, BuiltImage};
pub use concurrency::{install_signal_handler, shutdown_requested, ProjectLock, LOCK_FILE_NAME};
pub use config::{Settings, SETTINGS_FILE_NAME};
pub use events::{ConsoleSink, Event, EventSink, Outcome, RecordingSink, Stream, Verb};
pub use lifecycle::{Action, ActionOptions, ActionReport, LifecycleManager, ServiceOutcome};
pub use scope::{phases, Direction, RunInstance, Scope};

use dockhand_engine::{ContainerEngine, EngineError};
use dockhand_schema::{Project, VolumeMount};
use std::collections::BTreeMap;
use thiserror::Error;

const PROJECT_LABEL: &str = "com.dockhand.project";
const SERVICE_LABEL: &str = "com.dockhand.service";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("invalid volume: {0}")]
    InvalidVolume(String),
    #[error("build failed: conductor exited with code {0}")]
    ConductorFailed(i64),
    #[error("build failed for service '{service}': {source}")]
    ServiceBuildFailed {
        service: String,
        #[source]
        source: EngineError,
    },
    #[error("{action} failed for: {}", failed.join(", "))]
    LifecycleActionFailure { action: String, failed: Vec<String> },
    #[error("interrupted")]
    Interrupted,
    #[error("project is locked by another dockhand process: {0}")]
    Locked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fail early with `EngineError::Unavailable` when the engine cannot be reached.
pub(crate) fn ensure_available(engine: &dyn ContainerEngine) -> Result<(), CoreError> {
    if engine.available() {
        Ok(())
    } else {
        Err(EngineError::Unavailable(format!("{} is not reachable", engine.name())).into())
    }
}

pub(crate) fn service_labels(project: &Project, service: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (PROJECT_LABEL.to_owned(), project.name.clone()),
        (SERVICE_LABEL.to_owned(), service.to_owned()),
    ])
}

/// Engine mount syntax for a service volume. Relative host paths resolve
/// against the project directory.
pub(crate) fn host_mount(project: &Project, volume: &VolumeMount) -> String {
    match volume.source.as_deref() {
        Some(source) if source.starts_with('.') => format!(
            "{}:{}:{}",
            project.root.join(source).display(),
            volume.target,
            volume.mode.as_str()
        ),
        _ => volume.to_string(),
    }
}
