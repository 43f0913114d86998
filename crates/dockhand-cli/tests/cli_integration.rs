//! CLI subprocess integration tests.
//!
//! These tests invoke the `dockhand` binary against the persistent mock
//! engine and verify exit codes and the status lines on stdout and stderr.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const TWO_SERVICES: &str = r#"version: "1"
services:
  minimal1:
    image: centos:7
    command: [sleep, "10"]
  minimal2:
    image: centos:7
    command: [sleep, "10"]
"#;

const EXPOSED_SERVICE: &str = r#"version: "1"
services:
  web:
    image: nginx:latest
    build: false
    ports: ["8080:80"]
"#;

/// A scratch project plus the state file the mock engine keeps between invocations.
struct Fixture {
    _dir: tempfile::TempDir,
    project: PathBuf,
    state: PathBuf,
}

impl Fixture {
    fn new(name: &str, container_yml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join(name);
        std::fs::create_dir_all(project.join("ansible")).unwrap();
        std::fs::write(project.join("ansible/container.yml"), container_yml).unwrap();
        std::fs::write(project.join("ansible/main.yml"), "- hosts: all\n").unwrap();
        let state = dir.path().join("engine.json");
        Self {
            _dir: dir,
            project,
            state,
        }
    }

    fn dockhand(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dockhand"))
            .args(args)
            .arg("--project-dir")
            .arg(&self.project)
            .env("DOCKHAND_ENGINE", "mock")
            .env("DOCKHAND_ENGINE_STATE", &self.state)
            .env_remove("DOCKHAND_LOG")
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn lines_starting(text: &str, prefix: &str) -> Vec<String> {
    text.lines()
        .filter(|l| l.starts_with(prefix))
        .map(str::to_owned)
        .collect()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "exit {:?}\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        stdout(output),
        stderr(output)
    );
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_dockhand"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("dockhand"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_dockhand"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["build", "run", "stop", "restart", "shipit", "completions"] {
        assert!(text.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_dockhand"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("dockhand"));
}

#[test]
fn build_flatten_exports_each_service_once() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let output = fx.dockhand(&["build", "--flatten"]);
    assert_success(&output);

    let err = stderr(&output);
    let exported = lines_starting(&err, "Exported ");
    assert_eq!(exported.len(), 2, "{err}");
    assert!(exported[0].starts_with("Exported minimal-minimal1 with image ID sha256:"));
    assert!(exported[1].starts_with("Exported minimal-minimal2 with image ID sha256:"));
    assert!(err.contains("Exporting built containers as images..."));
    assert!(stdout(&output).contains("Aborting on container exit..."));
}

#[test]
fn build_rejects_malformed_variables() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let output = fx.dockhand(&["build", "--with-variables", "novalue"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("error: project error:"));
}

#[test]
fn run_detached_then_stop_all_in_reverse_order() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let run = fx.dockhand(&["run", "--detached"]);
    assert_success(&run);
    let err = stderr(&run);
    assert!(err.starts_with("Deploying application in detached mode"), "{err}");
    assert!(err.contains("Creating ansible_minimal1_1 ... done"));
    assert!(err.contains("Creating ansible_minimal2_1 ... done"));

    let stop = fx.dockhand(&["stop"]);
    assert_success(&stop);
    assert_eq!(
        lines_starting(&stderr(&stop), "Stopping "),
        vec![
            "Stopping ansible_minimal2_1 ... done",
            "Stopping ansible_minimal1_1 ... done"
        ]
    );
}

#[test]
fn stop_single_service_leaves_others_alone() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    assert_success(&fx.dockhand(&["run", "--detached"]));

    let stop = fx.dockhand(&["stop", "minimal1"]);
    assert_success(&stop);
    let err = stderr(&stop);
    assert_eq!(
        lines_starting(&err, "Stopping "),
        vec!["Stopping ansible_minimal1_1 ... done"]
    );
    assert!(!err.contains("minimal2"));
    assert!(!stdout(&stop).contains("minimal2"));
}

#[test]
fn forced_stop_only_kills() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    assert_success(&fx.dockhand(&["run", "--detached"]));

    let stop = fx.dockhand(&["stop", "--force"]);
    assert_success(&stop);
    let err = stderr(&stop);
    assert!(lines_starting(&err, "Stopping ").is_empty());
    assert_eq!(lines_starting(&err, "Killing ").len(), 2);
}

#[test]
fn second_run_reports_up_to_date() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    assert_success(&fx.dockhand(&["run", "--detached"]));
    let again = fx.dockhand(&["run", "--detached"]);
    assert_success(&again);
    assert!(stderr(&again).contains("ansible_minimal1_1 is up-to-date"));
}

#[test]
fn restart_scoped_to_one_service() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    assert_success(&fx.dockhand(&["run", "--detached"]));

    let restart = fx.dockhand(&["restart", "minimal2"]);
    assert_success(&restart);
    let err = stderr(&restart);
    assert_eq!(
        lines_starting(&err, "Restarting "),
        vec!["Restarting ansible_minimal2_1 ... done"]
    );
    assert!(!err.contains("minimal1"));
}

#[test]
fn attached_run_reports_exit_codes() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let run = fx.dockhand(&["run"]);
    assert_success(&run);
    let out = stdout(&run);
    assert!(out.contains("ansible_minimal1_1 exited with code 0"), "{out}");
    assert!(out.contains("ansible_minimal2_1 exited with code 0"), "{out}");
}

#[test]
fn unknown_service_is_a_load_error() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let output = fx.dockhand(&["stop", "nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("error: unknown service: nope"));
}

#[test]
fn missing_project_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_dockhand"))
        .args(["run", "--project-dir"])
        .arg(dir.path())
        .env("DOCKHAND_ENGINE", "mock")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("error: project error:"));
}

#[test]
fn unknown_engine_is_an_engine_error() {
    let fx = Fixture::new("minimal", TWO_SERVICES);
    let output = fx.dockhand(&["run", "--engine", "podman"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("container engine unavailable"));
}

fn saved_artifact(project: &Path, platform: &str) -> serde_yaml::Value {
    let path = project.join(format!("ansible/shipit_config/{platform}/deployment_artifacts.yml"));
    serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn shipit_save_config_kubernetes() {
    let fx = Fixture::new("shop", EXPOSED_SERVICE);
    let output = fx.dockhand(&["shipit", "kube", "--save-config"]);
    assert_success(&output);
    assert!(stderr(&output).contains("Saved configuration to "));
    assert!(stderr(&output).contains("shipit_config/kubernetes/deployment_artifacts.yml"));

    let doc = saved_artifact(&fx.project, "kubernetes");
    assert_eq!(doc["web-deployment"]["kind"], "Deployment");
    assert_eq!(doc["web-service"]["kind"], "Service");
    assert_eq!(doc["web-service"]["spec"]["type"], "LoadBalancer");
    assert_eq!(
        doc["web-deployment"]["spec"]["template"]["spec"]["containers"][0]["image"],
        "nginx:latest"
    );
}

#[test]
fn shipit_save_config_openshift_adds_route() {
    let fx = Fixture::new("shop", EXPOSED_SERVICE);
    let output = fx.dockhand(&["shipit", "openshift", "--save-config"]);
    assert_success(&output);

    let doc = saved_artifact(&fx.project, "openshift");
    let names: Vec<&str> = doc
        .as_mapping()
        .unwrap()
        .keys()
        .filter_map(serde_yaml::Value::as_str)
        .collect();
    assert_eq!(names.len(), 3);
    assert_eq!(doc["web-route"]["kind"], "Route");
}

#[test]
fn shipit_unknown_platform_fails() {
    let fx = Fixture::new("shop", EXPOSED_SERVICE);
    let output = fx.dockhand(&["shipit", "nomad", "--save-config"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unknown platform 'nomad'"));
}

#[test]
fn shipit_submit_without_cluster_config_fails() {
    let fx = Fixture::new("shop", EXPOSED_SERVICE);
    let home = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_dockhand"))
        .args(["shipit", "kubernetes", "--project-dir"])
        .arg(&fx.project)
        .env("HOME", home.path())
        .env_remove("DOCKHAND_CLUSTER_TOKEN")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("no --url and no cluster config"));
}
