pub mod build;
pub mod completions;
pub mod restart;
pub mod run;
pub mod shipit;
pub mod stop;

use dockhand_core::{ActionReport, ConsoleSink, CoreError, LifecycleManager, Scope, Settings};
use dockhand_engine::{select_engine, ContainerEngine};
use dockhand_schema::{load_project, LoadOptions, Project};
use std::path::PathBuf;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_LOAD_ERROR: u8 = 2;
pub const EXIT_ENGINE_ERROR: u8 = 3;

pub const DEFAULT_ENGINE: &str = "docker";

/// Prefix of every error raised while loading the project or its overlays.
const LOAD_ERROR_PREFIX: &str = "project error:";

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with(LOAD_ERROR_PREFIX)
        || msg.starts_with("configuration error:")
        || msg.starts_with("unknown service:")
        || msg.starts_with("invalid volume:")
    {
        EXIT_LOAD_ERROR
    } else if msg.contains("container engine unavailable") {
        EXIT_ENGINE_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn load_error(e: impl std::fmt::Display) -> String {
    format!("{LOAD_ERROR_PREFIX} {e}")
}

/// Global command-line context shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub project_dir: PathBuf,
    pub provisioning_dir: PathBuf,
    pub var_file: Option<PathBuf>,
    pub engine: Option<String>,
    pub engine_state: Option<PathBuf>,
}

/// A loaded project with the settings found next to it.
pub struct Session {
    pub project: Project,
    pub settings: Settings,
}

impl Workspace {
    pub fn load(&self) -> Result<Session, String> {
        let options = LoadOptions {
            provisioning_dir: self.provisioning_dir.clone(),
            var_file: self.var_file.clone(),
        };
        let project = load_project(&self.project_dir, &options).map_err(load_error)?;
        let settings = Settings::load(&project.provisioning_root).map_err(|e| e.to_string())?;
        let project = match &settings.namespace {
            Some(namespace) => project.with_namespace(namespace),
            None => project,
        };
        tracing::debug!(
            "loaded project '{}' with {} service(s)",
            project.name,
            project.services.len()
        );
        Ok(Session { project, settings })
    }

    /// The command line wins over `dockhand.toml`, which wins over the default.
    pub fn engine(&self, settings: &Settings) -> Result<Box<dyn ContainerEngine>, String> {
        let name = self
            .engine
            .as_deref()
            .or(settings.engine.as_deref())
            .unwrap_or(DEFAULT_ENGINE);
        select_engine(name, self.engine_state.as_deref()).map_err(|e| e.to_string())
    }
}

/// Apply one lifecycle action to the named services and fail if any container failed.
pub fn lifecycle<F>(workspace: &Workspace, services: &[String], act: F) -> Result<u8, String>
where
    F: FnOnce(&LifecycleManager<'_>, &Scope) -> Result<ActionReport, CoreError>,
{
    let session = workspace.load()?;
    let scope = Scope::from_names(services);
    scope.resolve(&session.project).map_err(|e| e.to_string())?;
    let engine = workspace.engine(&session.settings)?;
    let sink = ConsoleSink;
    let manager = LifecycleManager::new(&session.project, engine.as_ref(), &sink, &session.settings);
    act(&manager, &scope)
        .and_then(ActionReport::into_result)
        .map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_LOAD_ERROR);
        assert_ne!(EXIT_LOAD_ERROR, EXIT_ENGINE_ERROR);
    }

    #[test]
    fn load_failures_map_to_load_error() {
        assert_eq!(exit_code_for(&load_error("project defines no services")), EXIT_LOAD_ERROR);
        assert_eq!(exit_code_for("unknown service: nope"), EXIT_LOAD_ERROR);
        assert_eq!(exit_code_for("invalid volume: /a:/b:zz"), EXIT_LOAD_ERROR);
    }

    #[test]
    fn unreachable_engine_maps_to_engine_error() {
        assert_eq!(
            exit_code_for("engine error: container engine unavailable: docker is not reachable"),
            EXIT_ENGINE_ERROR
        );
    }

    #[test]
    fn everything_else_is_a_plain_failure() {
        assert_eq!(exit_code_for("build failed: conductor exited with code 2"), EXIT_FAILURE);
        assert_eq!(exit_code_for("stop failed for: ansible_web_1 (boom)"), EXIT_FAILURE);
    }

    #[test]
    fn explicit_engine_wins_over_settings() {
        let workspace = Workspace {
            project_dir: PathBuf::from("."),
            provisioning_dir: PathBuf::from("ansible"),
            var_file: None,
            engine: Some("mock".to_owned()),
            engine_state: None,
        };
        let settings = Settings {
            engine: Some("docker".to_owned()),
            ..Settings::default()
        };
        assert_eq!(workspace.engine(&settings).unwrap().name(), "mock");

        let unknown = Workspace {
            engine: Some("podman".to_owned()),
            ..workspace
        };
        let err = unknown.engine(&settings).err().unwrap();
        assert_eq!(exit_code_for(&err), EXIT_ENGINE_ERROR);
    }
}
