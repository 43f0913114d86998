use crate::normalize::Project;
use crate::variables::{render_template, Variables};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PROJECT_FILE_NAME: &str = "container.yml";
pub const DEFAULT_PROVISIONING_DIR: &str = "ansible";

/// Raw `container.yml` document, before normalization.
///
/// `services` is kept as an ordered YAML mapping: declaration order is the
/// start order of the project and must survive parsing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    pub version: serde_yaml::Value,
    #[serde(default)]
    pub services: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub image: String,
    #[serde(default = "default_build")]
    pub build: bool,
    #[serde(default)]
    pub command: Option<CommandSection>,
    #[serde(default)]
    pub entrypoint: Option<CommandSection>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub environment: Option<EnvironmentSection>,
    #[serde(default)]
    pub ports: Vec<ScalarEntry>,
    #[serde(default)]
    pub expose: Vec<ScalarEntry>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, PlatformSection>,
}

fn default_build() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSection {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EnvironmentSection {
    List(Vec<String>),
    Map(serde_yaml::Mapping),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScalarEntry {
    Number(u64),
    Text(String),
}

impl ScalarEntry {
    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    #[serde(default)]
    pub replicas: Option<u32>,
}

/// Where to find the project and which variable overlay to apply while loading it.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub provisioning_dir: PathBuf,
    pub var_file: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            provisioning_dir: PathBuf::from(DEFAULT_PROVISIONING_DIR),
            var_file: None,
        }
    }
}

pub fn parse_project_str(input: &str) -> Result<ProjectFile, SchemaError> {
    Ok(serde_yaml::from_str(input)?)
}

/// Load and normalize the project rooted at `project_dir`.
///
/// The variable file, when given, is resolved against the project directory
/// first and the provisioning root second. Its values are substituted into the
/// project file before it is parsed.
pub fn load_project(project_dir: &Path, options: &LoadOptions) -> Result<Project, SchemaError> {
    let project_dir = std::fs::canonicalize(project_dir)?;
    let provisioning_root = project_dir.join(&options.provisioning_dir);

    let variables = match &options.var_file {
        Some(path) => Variables::from_file(&resolve_var_file(
            path,
            &project_dir,
            &provisioning_root,
        ))?,
        None => Variables::new(),
    };

    let raw = std::fs::read_to_string(provisioning_root.join(PROJECT_FILE_NAME))?;
    let rendered = render_template(&raw, &variables)?;
    let file = parse_project_str(&rendered)?;

    let name = dir_basename(&project_dir);
    let namespace = dir_basename(&provisioning_root);
    file.normalize(&name, &namespace, &project_dir, &provisioning_root, variables)
}

fn resolve_var_file(path: &Path, project_dir: &Path, provisioning_root: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let in_project = project_dir.join(path);
    if in_project.exists() {
        return in_project;
    }
    provisioning_root.join(path)
}

/// Lowercased directory basename with characters an image repository cannot carry removed.
fn dir_basename(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if cleaned.is_empty() {
        "default".to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_project(dir: &Path, content: &str) {
        let root = dir.join(DEFAULT_PROVISIONING_DIR);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(PROJECT_FILE_NAME), content).unwrap();
    }

    #[test]
    fn parses_full_service_section() {
        let file = parse_project_str(
            r#"
version: "1"
services:
  web:
    image: centos:7
    command: ["httpd", "-DFOREGROUND"]
    environment:
      - MYVAR=foo
    ports: ["8080:80", 443]
    expose: [9000]
    volumes: ["/data:/srv/data:ro"]
    depends_on: [db]
    roles: [apache]
    options:
      kubernetes:
        replicas: 2
  db:
    image: postgres:9.6
    build: false
"#,
        )
        .unwrap();
        assert_eq!(file.services.len(), 2);
        let keys: Vec<_> = file
            .services
            .keys()
            .map(|k| k.as_str().unwrap().to_owned())
            .collect();
        assert_eq!(keys, vec!["web", "db"]);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        assert!(parse_project_str("version: 1\nservices: {}\nbogus: true\n").is_err());
    }

    #[test]
    fn load_derives_name_and_namespace_from_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("Minimal");
        write_project(
            &project_dir,
            "version: 1\nservices:\n  minimal:\n    image: busybox\n",
        );
        let project = load_project(&project_dir, &LoadOptions::default()).unwrap();
        assert_eq!(project.name, "minimal");
        assert_eq!(project.namespace, "ansible");
        assert_eq!(project.services.len(), 1);
    }

    #[test]
    fn load_applies_var_file_from_project_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("vartest");
        write_project(
            &project_dir,
            "version: 1\nservices:\n  web:\n    image: \"{{ web_image }}\"\n",
        );
        std::fs::write(project_dir.join("devel.yaml"), "web_image: nginx:1.11\n").unwrap();

        let options = LoadOptions {
            var_file: Some(PathBuf::from("devel.yaml")),
            ..LoadOptions::default()
        };
        let project = load_project(&project_dir, &options).unwrap();
        assert_eq!(project.variables.get("web_image"), Some("nginx:1.11"));
        assert_eq!(project.services[0].source.image(), "nginx:1.11");
    }

    #[test]
    fn load_falls_back_to_provisioning_root_for_var_file() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("vartest");
        write_project(
            &project_dir,
            "version: 1\nservices:\n  web:\n    image: \"{{ img }}\"\n",
        );
        std::fs::write(
            project_dir.join(DEFAULT_PROVISIONING_DIR).join("devel.yaml"),
            "img: alpine\n",
        )
        .unwrap();
        let options = LoadOptions {
            var_file: Some(PathBuf::from("devel.yaml")),
            ..LoadOptions::default()
        };
        let project = load_project(&project_dir, &options).unwrap();
        assert_eq!(project.services[0].source.image(), "alpine");
    }

    #[test]
    fn load_without_var_file_fails_on_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("vartest");
        write_project(
            &project_dir,
            "version: 1\nservices:\n  web:\n    image: \"{{ web_image }}\"\n",
        );
        let err = load_project(&project_dir, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::UndefinedVariable(_)));
    }

    #[test]
    fn load_missing_project_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_project(tmp.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::Io(_)));
    }

    #[test]
    fn basename_is_sanitized() {
        assert_eq!(dir_basename(Path::new("/tmp/My App!")), "myapp");
        assert_eq!(dir_basename(Path::new("/")), "default");
    }
}
