//! Project definition parsing, variable overlay, and the normalized project model for Dockhand.
//!
//! This crate defines the schema layer: `container.yml` parsing (`ProjectFile`),
//! `{{ var }}` templating against a variable overlay (`Variables`), and the
//! normalized, immutable `Project` consumed by the build orchestrator, the
//! lifecycle manager, and the deployment artifact generator.

pub mod normalize;
pub mod project;
pub mod types;
pub mod variables;

pub use normalize::{
    EnvVar, PlatformSettings, PortMapping, Project, Protocol, Service, ServiceSource, VolumeMount,
    VolumeMode, CONDUCTOR_SERVICE,
};
pub use project::{
    load_project, parse_project_str, LoadOptions, ProjectFile, ServiceSection,
    DEFAULT_PROVISIONING_DIR, PROJECT_FILE_NAME,
};
pub use types::{ContainerName, ImageId, ServiceName};
pub use variables::{render_template, Variables};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse project file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported project version: '{0}', expected 1")]
    UnsupportedVersion(String),
    #[error("project defines no services")]
    NoServices,
    #[error("invalid service name '{0}': expected [a-z0-9][a-z0-9_-]*")]
    InvalidServiceName(String),
    #[error("service '{0}': image must not be empty")]
    EmptyImage(String),
    #[error("service '{service}': invalid port '{spec}'")]
    InvalidPort { service: String, spec: String },
    #[error("service '{service}': invalid volume '{spec}', expected 'source:target[:ro|rw]'")]
    InvalidVolume { service: String, spec: String },
    #[error("service '{service}': invalid environment entry '{entry}'")]
    InvalidEnvironment { service: String, entry: String },
    #[error("service '{service}': unterminated quote in '{spec}'")]
    InvalidCommand { service: String, spec: String },
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },
    #[error("dependency cycle between services: {0}")]
    DependencyCycle(String),
    #[error("undefined variable '{0}' in project file")]
    UndefinedVariable(String),
    #[error("invalid template expression '{0}'")]
    InvalidTemplate(String),
    #[error("invalid variable assignment '{0}', expected 'key=value'")]
    InvalidAssignment(String),
    #[error("variable file {path}: {reason}")]
    InvalidVariableFile { path: String, reason: String },
}
