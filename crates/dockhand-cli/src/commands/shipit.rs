use super::{load_error, Workspace, EXIT_SUCCESS};
use console::style;
use dockhand_shipit::{
    save_manifests, submit, ClusterConfig, HttpClusterClient, RenderOptions, RendererRegistry,
    SubmissionStatus,
};

pub struct ShipitArgs {
    pub save_config: bool,
    pub tag: String,
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
}

pub fn run(workspace: &Workspace, platform: &str, args: &ShipitArgs) -> Result<u8, String> {
    let session = workspace.load()?;
    let registry = RendererRegistry::new();
    let options = RenderOptions {
        tag: args.tag.clone(),
    };
    let set = registry
        .render(&session.project, platform, &options)
        .map_err(|e| e.to_string())?;

    if args.save_config {
        let path = save_manifests(&set, &session.project.provisioning_root)
            .map_err(|e| e.to_string())?;
        eprintln!("Saved configuration to {}", path.display());
        return Ok(EXIT_SUCCESS);
    }

    let client = HttpClusterClient::new(cluster_config(args)?);
    let report = submit(&set, &client);
    for outcome in &report.outcomes {
        let word = match &outcome.status {
            SubmissionStatus::Accepted(_) => style("done").green(),
            SubmissionStatus::Rejected(_) => style("error").red(),
            SubmissionStatus::Skipped => style("skipped").yellow(),
        };
        eprintln!("Submitting {} ... {}", outcome.name, word.for_stderr());
    }
    report.into_result().map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}

/// `--url` replaces the saved cluster config; `--namespace` and `--token` refine either.
fn cluster_config(args: &ShipitArgs) -> Result<ClusterConfig, String> {
    let mut config = match &args.url {
        Some(url) => ClusterConfig::new(url),
        None => ClusterConfig::load_default()
            .map_err(|e| load_error(format!("no --url and no cluster config: {e}")))?,
    };
    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace);
    }
    if let Some(token) = &args.token {
        config = config.with_token(token);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: Option<&str>) -> ShipitArgs {
        ShipitArgs {
            save_config: false,
            tag: "latest".to_owned(),
            url: url.map(str::to_owned),
            namespace: Some("demo".to_owned()),
            token: Some("t0ken".to_owned()),
        }
    }

    #[test]
    fn flags_build_cluster_config() {
        let config = cluster_config(&args(Some("https://api.example:6443/"))).unwrap();
        assert_eq!(config.url, "https://api.example:6443");
        assert_eq!(config.namespace, "demo");
        assert_eq!(config.token.as_deref(), Some("t0ken"));
    }
}
