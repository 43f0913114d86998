use crate::project::{parse_project_str, CommandSection, EnvironmentSection, ProjectFile, ServiceSection};
use crate::types::{ContainerName, ServiceName};
use crate::variables::{scalar_to_string, Variables};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Service name under which the conductor container is created.
pub const CONDUCTOR_SERVICE: &str = "ansible-container";

/// Normalized, immutable project model.
///
/// Services keep their declaration order, which is also the start order.
/// Every dependency refers to a declared service and the dependency graph is
/// acyclic; `start_levels` holds its topological layering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// Image prefix: images are tagged `{name}-{service}`.
    pub name: String,
    /// Container prefix: containers are named `{namespace}_{service}_{n}`.
    pub namespace: String,
    pub root: PathBuf,
    pub provisioning_root: PathBuf,
    pub services: Vec<Service>,
    pub variables: Variables,
    levels: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub name: ServiceName,
    pub source: ServiceSource,
    pub environment: Vec<EnvVar>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub depends_on: Vec<ServiceName>,
    pub roles: Vec<String>,
    pub options: BTreeMap<String, PlatformSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    /// Base image provisioned inside the conductor and exported as `{project}-{service}`.
    Build { base_image: String },
    /// Image run as-is; never provisioned.
    Image(String),
}

impl ServiceSource {
    pub fn image(&self) -> &str {
        match self {
            Self::Build { base_image } => base_image,
            Self::Image(image) => image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    ReadWrite,
    ReadOnly,
}

impl VolumeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "rw",
            Self::ReadOnly => "ro",
        }
    }
}

/// A `source:target:mode` mount. `source` is absent for anonymous volumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: Option<String>,
    pub target: String,
    pub mode: VolumeMode,
}

impl VolumeMount {
    /// Parse `target`, `source:target` or `source:target:ro|rw`.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, VolumeMode::ReadWrite),
            [source, target] => (Some(*source), *target, VolumeMode::ReadWrite),
            [source, target, "ro"] => (Some(*source), *target, VolumeMode::ReadOnly),
            [source, target, "rw"] => (Some(*source), *target, VolumeMode::ReadWrite),
            _ => return None,
        };
        if target.is_empty() || !target.starts_with('/') || source.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self {
            source: source.map(str::to_owned),
            target: target.to_owned(),
            mode,
        })
    }

    /// True when the source names a path on the host rather than a named volume.
    pub fn is_host_path(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| s.starts_with('/') || s.starts_with('.') || s.starts_with('~'))
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == VolumeMode::ReadOnly
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source}:{}:{}", self.target, self.mode.as_str()),
            None => f.write_str(&self.target),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// Upper-case form used by orchestration manifests.
    pub fn manifest_name(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// A container port, optionally published on the host.
///
/// Entries from `ports` are published (externally reachable); entries from
/// `expose` are reachable only by other services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
    pub published: bool,
}

impl PortMapping {
    /// The port other workloads address: the host port when fixed, else the container port.
    pub fn service_port(&self) -> u16 {
        self.host_port.unwrap_or(self.container_port)
    }

    fn parse(spec: &str, published: bool) -> Option<Self> {
        let (addr, protocol) = match spec.rsplit_once('/') {
            Some((addr, "tcp")) => (addr, Protocol::Tcp),
            Some((addr, "udp")) => (addr, Protocol::Udp),
            Some(_) => return None,
            None => (spec, Protocol::Tcp),
        };
        let parts: Vec<&str> = addr.split(':').collect();
        let (host_ip, host_port, container_port) = match (parts.as_slice(), published) {
            ([container], _) => (None, None, *container),
            ([host, container], true) => (None, Some(*host), *container),
            ([ip, host, container], true) => (Some(*ip), Some(*host), *container),
            _ => return None,
        };
        let container_port = parse_port_number(container_port)?;
        let host_port = match host_port {
            Some("") | None => None,
            Some(p) => Some(parse_port_number(p)?),
        };
        Some(Self {
            host_ip: host_ip.filter(|ip| !ip.is_empty()).map(str::to_owned),
            host_port,
            container_port,
            protocol,
            published,
        })
    }
}

fn parse_port_number(s: &str) -> Option<u16> {
    s.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformSettings {
    pub replicas: Option<u32>,
}

impl Service {
    pub fn is_built(&self) -> bool {
        matches!(self.source, ServiceSource::Build { .. })
    }

    pub fn published_ports(&self) -> impl Iterator<Item = &PortMapping> {
        self.ports.iter().filter(|p| p.published)
    }

    pub fn env_strings(&self) -> Vec<String> {
        self.environment.iter().map(ToString::to_string).collect()
    }

    pub fn replicas(&self, platform: &str) -> Option<u32> {
        self.options.get(platform).and_then(|o| o.replicas)
    }
}

impl Project {
    /// Parse and normalize an in-memory project definition rooted at the current directory.
    pub fn from_yaml(name: &str, namespace: &str, yaml: &str) -> Result<Self, SchemaError> {
        let root = PathBuf::from(".");
        let provisioning_root = root.join(namespace);
        parse_project_str(yaml)?.normalize(name, namespace, &root, &provisioning_root, Variables::new())
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<ServiceName> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn container_name(&self, service: &str, instance: u32) -> ContainerName {
        ContainerName::new(format!("{}_{service}_{instance}", self.namespace))
    }

    pub fn conductor_name(&self) -> ContainerName {
        self.container_name(CONDUCTOR_SERVICE, 1)
    }

    pub fn image_repository(&self, service: &str) -> String {
        format!("{}-{service}", self.name)
    }

    /// Image a service runs from: its exported build for built services, the raw image otherwise.
    pub fn run_image(&self, service: &Service) -> String {
        match &service.source {
            ServiceSource::Build { .. } => format!("{}:latest", self.image_repository(&service.name)),
            ServiceSource::Image(image) => image.clone(),
        }
    }

    /// Dependency layers: every service in layer `n` only depends on services in earlier layers.
    /// Indices refer to `services` and are ordered by declaration within a layer.
    pub fn start_levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        namespace.clone_into(&mut self.namespace);
        self
    }
}

impl ProjectFile {
    /// Validate the raw document and produce the normalized project model.
    pub fn normalize(
        &self,
        name: &str,
        namespace: &str,
        root: &std::path::Path,
        provisioning_root: &std::path::Path,
        variables: Variables,
    ) -> Result<Project, SchemaError> {
        let version = scalar_to_string(&self.version).unwrap_or_default();
        if version.trim() != "1" {
            return Err(SchemaError::UnsupportedVersion(version));
        }
        if self.services.is_empty() {
            return Err(SchemaError::NoServices);
        }

        let mut services = Vec::with_capacity(self.services.len());
        for (key, value) in &self.services {
            let service_name = key
                .as_str()
                .ok_or_else(|| SchemaError::InvalidServiceName(format!("{key:?}")))?;
            if !is_valid_service_name(service_name) {
                return Err(SchemaError::InvalidServiceName(service_name.to_owned()));
            }
            let section: ServiceSection = serde_yaml::from_value(value.clone())?;
            services.push(normalize_service(service_name, &section)?);
        }

        let levels = dependency_levels(&services)?;

        Ok(Project {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            root: root.to_path_buf(),
            provisioning_root: provisioning_root.to_path_buf(),
            services,
            variables,
            levels,
        })
    }
}

fn normalize_service(name: &str, section: &ServiceSection) -> Result<Service, SchemaError> {
    let image = section.image.trim().to_owned();
    if image.is_empty() {
        return Err(SchemaError::EmptyImage(name.to_owned()));
    }
    let source = if section.build {
        ServiceSource::Build { base_image: image }
    } else {
        ServiceSource::Image(image)
    };

    let mut ports = Vec::with_capacity(section.ports.len() + section.expose.len());
    for (entries, published) in [(&section.ports, true), (&section.expose, false)] {
        for entry in entries {
            let spec = entry.as_text();
            let port = PortMapping::parse(&spec, published).ok_or_else(|| SchemaError::InvalidPort {
                service: name.to_owned(),
                spec: spec.clone(),
            })?;
            ports.push(port);
        }
    }

    let volumes = section
        .volumes
        .iter()
        .map(|spec| {
            VolumeMount::parse(spec).ok_or_else(|| SchemaError::InvalidVolume {
                service: name.to_owned(),
                spec: spec.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut depends_on: Vec<ServiceName> = Vec::new();
    let link_targets = section
        .links
        .iter()
        .map(|l| l.split_once(':').map_or(l.as_str(), |(target, _)| target));
    for dep in section.depends_on.iter().map(String::as_str).chain(link_targets) {
        let dep = dep.trim();
        if !depends_on.iter().any(|d| d == dep) {
            depends_on.push(ServiceName::new(dep));
        }
    }

    Ok(Service {
        name: ServiceName::new(name),
        source,
        environment: normalize_environment(name, section.environment.as_ref())?,
        volumes,
        ports,
        command: normalize_command(name, section.command.as_ref())?,
        entrypoint: normalize_command(name, section.entrypoint.as_ref())?,
        working_dir: section.working_dir.clone(),
        depends_on,
        roles: section.roles.clone(),
        options: section
            .options
            .iter()
            .map(|(k, v)| (k.clone(), PlatformSettings { replicas: v.replicas }))
            .collect(),
    })
}

/// Later assignments of a key override its value but keep its first position.
fn normalize_environment(
    service: &str,
    section: Option<&EnvironmentSection>,
) -> Result<Vec<EnvVar>, SchemaError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    match section {
        None => {}
        Some(EnvironmentSection::List(entries)) => {
            for entry in entries {
                let Some((k, v)) = entry.split_once('=') else {
                    return Err(SchemaError::InvalidEnvironment {
                        service: service.to_owned(),
                        entry: entry.clone(),
                    });
                };
                pairs.push((k.trim().to_owned(), v.to_owned()));
            }
        }
        Some(EnvironmentSection::Map(map)) => {
            for (k, v) in map {
                let (Some(k), Some(v)) = (scalar_to_string(k), scalar_to_string(v)) else {
                    return Err(SchemaError::InvalidEnvironment {
                        service: service.to_owned(),
                        entry: format!("{k:?}"),
                    });
                };
                pairs.push((k, v));
            }
        }
    }

    let mut env: Vec<EnvVar> = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        if name.is_empty() {
            return Err(SchemaError::InvalidEnvironment {
                service: service.to_owned(),
                entry: format!("={value}"),
            });
        }
        match env.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value,
            None => env.push(EnvVar { name, value }),
        }
    }
    Ok(env)
}

fn normalize_command(
    service: &str,
    section: Option<&CommandSection>,
) -> Result<Option<Vec<String>>, SchemaError> {
    match section {
        None => Ok(None),
        Some(CommandSection::Exec(args)) => Ok(Some(args.clone())),
        Some(CommandSection::Shell(line)) => split_command(line)
            .map(Some)
            .ok_or_else(|| SchemaError::InvalidCommand {
                service: service.to_owned(),
                spec: line.clone(),
            }),
    }
}

/// Split a command line on whitespace, honouring single and double quotes.
fn split_command(line: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return None;
    }
    if in_word {
        args.push(current);
    }
    Some(args)
}

fn is_valid_service_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn dependency_levels(services: &[Service]) -> Result<Vec<Vec<usize>>, SchemaError> {
    let index_of = |name: &str| services.iter().position(|s| s.name == name);

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(services.len());
    for service in services {
        let mut indices = Vec::with_capacity(service.depends_on.len());
        for dep in &service.depends_on {
            let idx = index_of(dep).ok_or_else(|| SchemaError::UnknownDependency {
                service: service.name.to_string(),
                dependency: dep.to_string(),
            })?;
            indices.push(idx);
        }
        deps.push(indices);
    }

    let mut level_of: Vec<Option<usize>> = vec![None; services.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();
    let mut placed = 0;
    while placed < services.len() {
        let current = levels.len();
        let ready: Vec<usize> = (0..services.len())
            .filter(|&i| level_of[i].is_none())
            .filter(|&i| deps[i].iter().all(|&d| level_of[d].is_some_and(|l| l < current)))
            .collect();
        if ready.is_empty() {
            let stuck: Vec<&str> = (0..services.len())
                .filter(|&i| level_of[i].is_none())
                .map(|i| services[i].name.as_str())
                .collect();
            return Err(SchemaError::DependencyCycle(stuck.join(", ")));
        }
        for &i in &ready {
            level_of[i] = Some(current);
        }
        placed += ready.len();
        levels.push(ready);
    }
    Ok(levels)
}
