use super::{load_error, Workspace, EXIT_SUCCESS};
use dockhand_core::{BuildOrchestrator, BuildPlan, ConsoleSink, ProjectLock, LOCK_FILE_NAME};
use dockhand_schema::Variables;

pub struct BuildArgs {
    pub flatten: bool,
    pub save_build_container: bool,
    pub with_variables: Vec<String>,
    pub with_volumes: Vec<String>,
}

pub fn run(workspace: &Workspace, args: &BuildArgs) -> Result<u8, String> {
    let session = workspace.load()?;
    let overrides = Variables::parse_assignments(&args.with_variables).map_err(load_error)?;
    let plan = BuildPlan::new(&session.project, &overrides)
        .flatten(args.flatten)
        .save_build_container(args.save_build_container)
        .with_volumes(&args.with_volumes)
        .map_err(|e| e.to_string())?;
    let engine = workspace.engine(&session.settings)?;

    let lock_path = session.project.provisioning_root.join(LOCK_FILE_NAME);
    let _lock = ProjectLock::try_acquire(&lock_path).map_err(|e| e.to_string())?;

    let sink = ConsoleSink;
    let report = BuildOrchestrator::new(&session.project, engine.as_ref(), &sink, &session.settings)
        .build(&plan)
        .map_err(|e| e.to_string())?;
    tracing::debug!(
        "built {} image(s) tagged {}",
        report.images.len(),
        report.version_tag
    );
    Ok(EXIT_SUCCESS)
}
