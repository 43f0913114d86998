use crate::backend::{ContainerEngine, ContainerInfo, ContainerSpec, ContainerStatus, ImageConfig};
use crate::EngineError;
use dockhand_schema::ImageId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::debug;

/// Engine backend driving the `docker` command-line client.
pub struct DockerEngine {
    program: String,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self {
            program: "docker".to_owned(),
        }
    }
}

impl DockerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a docker-compatible client binary other than `docker`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn output(&self, args: &[&str]) -> Result<Output, EngineError> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == ErrorKind::NotFound {
            EngineError::Unavailable(format!("'{}' not found in PATH", self.program))
        } else {
            EngineError::Io(e)
        }
    }

    /// Run a client command and return trimmed stdout, mapping failures to errors.
    fn run(&self, op: &str, target: &str, args: &[&str]) -> Result<String, EngineError> {
        let output = self.output(args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
        }
        Err(classify_failure(op, target, &output.stderr))
    }
}

fn classify_failure(op: &str, target: &str, stderr: &[u8]) -> EngineError {
    let detail = String::from_utf8_lossy(stderr).trim().to_owned();
    let lower = detail.to_lowercase();
    if lower.contains("cannot connect to the docker daemon") || lower.contains("is the docker daemon running") {
        EngineError::Unavailable(detail)
    } else if lower.contains("no such container") {
        EngineError::NoSuchContainer(target.to_owned())
    } else if lower.contains("no such image") || lower.contains("unable to find image") {
        EngineError::NoSuchImage(target.to_owned())
    } else if lower.contains("is already in use") {
        EngineError::AlreadyExists(target.to_owned())
    } else {
        EngineError::CommandFailed {
            op: op.to_owned(),
            target: target.to_owned(),
            detail,
        }
    }
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_owned(), "--name".to_owned(), spec.name.clone()];
    for entry in &spec.env {
        args.extend(["--env".to_owned(), entry.clone()]);
    }
    for volume in &spec.volumes {
        args.extend(["--volume".to_owned(), volume.clone()]);
    }
    for port in &spec.ports {
        args.extend(["--publish".to_owned(), port.clone()]);
    }
    if let Some(dir) = &spec.working_dir {
        args.extend(["--workdir".to_owned(), dir.clone()]);
    }
    for (k, v) in &spec.labels {
        args.extend(["--label".to_owned(), format!("{k}={v}")]);
    }
    // The client accepts a single entrypoint word; remaining words lead the command.
    let mut trailing = Vec::new();
    if let Some(entrypoint) = &spec.entrypoint {
        if let Some((first, rest)) = entrypoint.split_first() {
            args.extend(["--entrypoint".to_owned(), first.clone()]);
            trailing.extend(rest.iter().cloned());
        }
    }
    if let Some(command) = &spec.command {
        trailing.extend(command.iter().cloned());
    }
    args.push(spec.image.clone());
    args.extend(trailing);
    args
}

fn change_args(config: &ImageConfig) -> Vec<String> {
    config
        .to_changes()
        .into_iter()
        .flat_map(|change| ["--change".to_owned(), change])
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    mounts: Vec<InspectMount>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    exit_code: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default)]
    source: String,
    destination: String,
    #[serde(rename = "RW")]
    rw: bool,
}

impl From<InspectRecord> for ContainerInfo {
    fn from(record: InspectRecord) -> Self {
        let status = match record.state.status.as_str() {
            "created" => ContainerStatus::Created,
            "running" | "restarting" | "paused" => ContainerStatus::Running,
            _ => ContainerStatus::Exited(record.state.exit_code),
        };
        let mounts = record
            .mounts
            .iter()
            .map(|m| {
                let mode = if m.rw { "rw" } else { "ro" };
                format!("{}:{}:{mode}", m.source, m.destination)
            })
            .collect();
        Self {
            id: record.id,
            name: record.name.trim_start_matches('/').to_owned(),
            image: record.config.image,
            status,
            env: record.config.env.unwrap_or_default(),
            mounts,
            labels: record.config.labels.unwrap_or_default(),
        }
    }
}

impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    fn available(&self) -> bool {
        self.output(&["version", "--format", "{{.Server.Version}}"])
            .is_ok_and(|o| o.status.success())
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let args = create_args(spec);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("create", &spec.name, &refs)
    }

    fn start(&self, name: &str) -> Result<(), EngineError> {
        self.run("start", name, &["start", name]).map(|_| ())
    }

    fn wait(&self, name: &str) -> Result<i64, EngineError> {
        let out = self.run("wait", name, &["wait", name])?;
        out.lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|e| EngineError::CommandFailed {
                op: "wait".to_owned(),
                target: name.to_owned(),
                detail: format!("unexpected exit code output '{out}': {e}"),
            })
    }

    fn logs(&self, name: &str) -> Result<String, EngineError> {
        let output = self.output(&["logs", name])?;
        if !output.status.success() {
            return Err(classify_failure("logs", name, &output.stderr));
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        let secs = grace.as_secs().to_string();
        self.run("stop", name, &["stop", "--time", &secs, name])
            .map(|_| ())
    }

    fn kill(&self, name: &str) -> Result<(), EngineError> {
        self.run("kill", name, &["kill", name]).map(|_| ())
    }

    fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.run("remove", name, &["rm", "--force", "--volumes", name])
            .map(|_| ())
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        let output = self.output(&["container", "inspect", "--format", "{{json .}}", name])?;
        if !output.status.success() {
            return match classify_failure("inspect", name, &output.stderr) {
                EngineError::NoSuchContainer(_) => Ok(None),
                other => Err(other),
            };
        }
        let record: InspectRecord = serde_json::from_slice(&output.stdout).map_err(|e| {
            EngineError::CommandFailed {
                op: "inspect".to_owned(),
                target: name.to_owned(),
                detail: format!("failed to parse inspect output: {e}"),
            }
        })?;
        Ok(Some(record.into()))
    }

    fn list(&self, namespace: &str) -> Result<Vec<ContainerInfo>, EngineError> {
        let filter = format!("name=^/?{namespace}_");
        let names = self.run(
            "list",
            namespace,
            &["ps", "--all", "--filter", &filter, "--format", "{{.Names}}"],
        )?;
        let mut containers = Vec::new();
        for name in names.lines().map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(info) = self.inspect(name)? {
                containers.push(info);
            }
        }
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    fn commit(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError> {
        let mut args = vec!["commit".to_owned()];
        args.extend(change_args(config));
        args.push(name.to_owned());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("commit", name, &refs).map(ImageId::new)
    }

    fn flatten(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError> {
        let mut export = Command::new(&self.program)
            .args(["export", name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let stream = export.stdout.take().ok_or_else(|| EngineError::CommandFailed {
            op: "export".to_owned(),
            target: name.to_owned(),
            detail: "export produced no output stream".to_owned(),
        })?;

        let mut args = vec!["import".to_owned()];
        args.extend(change_args(config));
        args.push("-".to_owned());
        let import = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::from(stream))
            .output()
            .map_err(|e| self.spawn_error(e))?;
        let exported = export.wait_with_output()?;

        if !exported.status.success() {
            return Err(classify_failure("export", name, &exported.stderr));
        }
        if !import.status.success() {
            return Err(classify_failure("import", name, &import.stderr));
        }
        Ok(ImageId::new(
            String::from_utf8_lossy(&import.stdout).trim().to_owned(),
        ))
    }

    fn tag(&self, image: &ImageId, repository: &str, tag: &str) -> Result<(), EngineError> {
        let reference = format!("{repository}:{tag}");
        self.run("tag", &reference, &["tag", image.as_str(), &reference])
            .map(|_| ())
    }

    fn untag(&self, reference: &str) -> Result<(), EngineError> {
        self.run("untag", reference, &["rmi", "--no-prune", reference])
            .map(|_| ())
    }

    fn remove_image(&self, image: &ImageId) -> Result<(), EngineError> {
        self.run("remove image", image.as_str(), &["rmi", image.as_str()])
            .map(|_| ())
    }

    fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        let output = self.output(&["image", "inspect", "--format", "{{.Id}}", reference])?;
        if output.status.success() {
            return Ok(true);
        }
        match classify_failure("image inspect", reference, &output.stderr) {
            EngineError::NoSuchImage(_) | EngineError::CommandFailed { .. } => Ok(false),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_args_place_entrypoint_and_command() {
        let spec = ContainerSpec {
            name: "ansible_web_1".to_owned(),
            image: "demo-web:latest".to_owned(),
            command: Some(vec!["-DFOREGROUND".to_owned()]),
            entrypoint: Some(vec!["httpd".to_owned(), "-X".to_owned()]),
            env: vec!["A=1".to_owned()],
            volumes: vec!["/srv:/srv:ro".to_owned()],
            ports: vec!["8080:80/tcp".to_owned()],
            working_dir: Some("/srv".to_owned()),
            labels: BTreeMap::new(),
        };
        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--name",
                "ansible_web_1",
                "--env",
                "A=1",
                "--volume",
                "/srv:/srv:ro",
                "--publish",
                "8080:80/tcp",
                "--workdir",
                "/srv",
                "--entrypoint",
                "httpd",
                "demo-web:latest",
                "-X",
                "-DFOREGROUND",
            ]
        );
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure("stop", "x", b"Error: No such container: x"),
            EngineError::NoSuchContainer(_)
        ));
        assert!(matches!(
            classify_failure(
                "create",
                "x",
                b"Cannot connect to the Docker daemon at unix:///var/run/docker.sock."
            ),
            EngineError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure("create", "x", b"Conflict. The container name \"/x\" is already in use"),
            EngineError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify_failure("commit", "x", b"boom"),
            EngineError::CommandFailed { .. }
        ));
    }

    #[test]
    fn inspect_record_conversion() {
        let json = r#"{
            "Id": "abc",
            "Name": "/ansible_web_1",
            "Config": {"Image": "demo-web:latest", "Env": ["A=1"], "Labels": null},
            "State": {"Status": "exited", "ExitCode": 137},
            "Mounts": [{"Source": "/srv", "Destination": "/data", "RW": false}]
        }"#;
        let record: InspectRecord = serde_json::from_str(json).unwrap();
        let info = ContainerInfo::from(record);
        assert_eq!(info.name, "ansible_web_1");
        assert_eq!(info.status, ContainerStatus::Exited(137));
        assert_eq!(info.mounts, vec!["/srv:/data:ro"]);
        assert!(info.labels.is_empty());
    }

    #[test]
    fn missing_client_is_unavailable() {
        let engine = DockerEngine::with_program("dockhand-no-such-client");
        assert!(!engine.available());
        assert!(matches!(
            engine.start("x"),
            Err(EngineError::Unavailable(_))
        ));
    }
}
