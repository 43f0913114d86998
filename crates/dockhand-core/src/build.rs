use crate::config::Settings;
use crate::events::{output_source, Event, EventSink, Outcome, Stream, Verb};
use crate::{ensure_available, host_mount, service_labels, CoreError};
use dockhand_engine::{ContainerEngine, ContainerSpec, EngineError, ImageConfig};
use dockhand_schema::{
    ContainerName, ImageId, Project, Service, ServiceName, Variables, VolumeMount,
    CONDUCTOR_SERVICE,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Where the provisioning root is mounted inside the conductor.
pub const CONDUCTOR_PROVISIONING_PATH: &str = "/ansible-container/ansible";
/// Playbook run by the conductor, relative to the provisioning root.
pub const PLAYBOOK: &str = "main.yml";
/// Marker variable visible to provisioning inside every build container.
pub const BUILD_MARKER_ENV: &str = "ANSIBLE_CONTAINER=1";

const KEEP_ALIVE: [&str; 3] = ["sh", "-c", "while true; do sleep 1000; done"];

/// Inputs of one build invocation.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Project variables overlaid with command-line variables.
    pub variables: Variables,
    pub flatten: bool,
    pub save_build_container: bool,
    /// Extra mounts for the conductor.
    pub volumes: Vec<VolumeMount>,
    /// Version tag applied next to `latest`.
    pub version_tag: String,
}

impl BuildPlan {
    /// Command-line variables win over variables from the project's variable file.
    pub fn new(project: &Project, overrides: &Variables) -> Self {
        Self {
            variables: project.variables.overlay(overrides),
            flatten: false,
            save_build_container: false,
            volumes: Vec::new(),
            version_tag: chrono::Local::now().format("%Y%m%d%H%M%S").to_string(),
        }
    }

    #[must_use]
    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    #[must_use]
    pub fn save_build_container(mut self, save: bool) -> Self {
        self.save_build_container = save;
        self
    }

    #[must_use]
    pub fn version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = tag.into();
        self
    }

    /// Parse `source:target[:mode]` conductor mounts.
    pub fn with_volumes<S: AsRef<str>>(mut self, specs: &[S]) -> Result<Self, CoreError> {
        for spec in specs {
            let spec = spec.as_ref();
            let mount = VolumeMount::parse(spec)
                .ok_or_else(|| CoreError::InvalidVolume(spec.to_owned()))?;
            self.volumes.push(mount);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub service: ServiceName,
    pub repository: String,
    pub image: ImageId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub images: Vec<BuiltImage>,
    pub version_tag: String,
}

impl BuildReport {
    pub fn image_for(&self, service: &str) -> Option<&ImageId> {
        self.images
            .iter()
            .find(|b| b.service == service)
            .map(|b| &b.image)
    }

    pub fn by_service(&self) -> BTreeMap<ServiceName, ImageId> {
        self.images
            .iter()
            .map(|b| (b.service.clone(), b.image.clone()))
            .collect()
    }
}

/// Builds service images by running provisioning inside a conductor container.
pub struct BuildOrchestrator<'a> {
    project: &'a Project,
    engine: &'a dyn ContainerEngine,
    sink: &'a dyn EventSink,
    settings: &'a Settings,
}

struct Target<'p> {
    service: &'p Service,
    container: ContainerName,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(
        project: &'a Project,
        engine: &'a dyn ContainerEngine,
        sink: &'a dyn EventSink,
        settings: &'a Settings,
    ) -> Self {
        Self {
            project,
            engine,
            sink,
            settings,
        }
    }

    /// Provision, commit, and tag every built service.
    ///
    /// Nothing is tagged unless the conductor exits with code 0 and every
    /// service image was committed. Build containers and the conductor are
    /// removed afterwards unless the plan asks to keep them.
    pub fn build(&self, plan: &BuildPlan) -> Result<BuildReport, CoreError> {
        ensure_available(self.engine)?;

        let targets: Vec<Target<'_>> = self
            .project
            .services
            .iter()
            .filter(|s| s.is_built())
            .map(|service| Target {
                service,
                container: self.project.container_name(&service.name, 1),
            })
            .collect();
        if targets.is_empty() {
            warn!("project '{}' has no services to build", self.project.name);
            return Ok(BuildReport {
                images: Vec::new(),
                version_tag: plan.version_tag.clone(),
            });
        }
        info!(
            "building {} service(s) for project '{}'",
            targets.len(),
            self.project.name
        );

        let conductor = self.project.conductor_name();
        self.discard_stale(&targets, &conductor)?;

        let result = self.provision_and_export(plan, &targets, &conductor);
        if plan.save_build_container {
            info!("keeping build containers");
        } else {
            self.teardown(&targets, &conductor);
        }
        result
    }

    fn discard_stale(&self, targets: &[Target<'_>], conductor: &ContainerName) -> Result<(), CoreError> {
        let names = targets.iter().map(|t| &t.container).chain(Some(conductor));
        for name in names {
            if self.engine.inspect(name)?.is_some() {
                debug!("removing stale container {name}");
                self.engine.remove(name)?;
            }
        }
        Ok(())
    }

    fn provision_and_export(
        &self,
        plan: &BuildPlan,
        targets: &[Target<'_>],
        conductor: &ContainerName,
    ) -> Result<BuildReport, CoreError> {
        for target in targets {
            let spec = self.build_container_spec(target);
            self.create_and_start(&spec, &target.container)
                .map_err(|source| CoreError::ServiceBuildFailed {
                    service: target.service.name.to_string(),
                    source,
                })?;
        }

        let conductor_failed = |source: EngineError| CoreError::ServiceBuildFailed {
            service: CONDUCTOR_SERVICE.to_owned(),
            source,
        };
        let spec = self.conductor_spec(plan, conductor);
        self.create_and_start(&spec, conductor)
            .map_err(conductor_failed)?;

        let code = self.engine.wait(conductor).map_err(conductor_failed)?;
        let source = output_source(conductor, &self.project.namespace);
        for line in self.engine.logs(conductor).map_err(conductor_failed)?.lines() {
            self.sink.emit(Event::Output {
                source: source.clone(),
                line: line.to_owned(),
            });
        }
        self.sink.emit(Event::Exited {
            container: conductor.clone(),
            code,
            stream: Stream::Stderr,
        });
        self.sink.emit(Event::AbortingOnExit);

        for target in targets.iter().rev() {
            let result = self
                .engine
                .stop(&target.container, self.settings.stop_timeout());
            self.sink
                .emit(Event::transition(Verb::Stopping, &target.container, Outcome::of(&result)));
            result.map_err(|source| CoreError::ServiceBuildFailed {
                service: target.service.name.to_string(),
                source,
            })?;
        }

        if code != 0 {
            warn!("conductor exited with code {code}; no images exported");
            return Err(CoreError::ConductorFailed(code));
        }

        self.sink.emit(Event::Exporting);
        let committed = self.commit_all(plan, targets)?;
        self.tag_all(plan, committed)
    }

    fn create_and_start(
        &self,
        spec: &ContainerSpec,
        container: &ContainerName,
    ) -> Result<(), EngineError> {
        let result = self
            .engine
            .create(spec)
            .and_then(|_| self.engine.start(container));
        self.sink
            .emit(Event::transition(Verb::Creating, container, Outcome::of(&result)));
        result
    }

    /// Commit (or flatten) every build container. On failure, images committed so far are removed.
    fn commit_all(
        &self,
        plan: &BuildPlan,
        targets: &[Target<'_>],
    ) -> Result<Vec<BuiltImage>, CoreError> {
        let mut committed: Vec<BuiltImage> = Vec::with_capacity(targets.len());
        for target in targets {
            let config = self.image_config(target.service);
            let result = if plan.flatten {
                self.engine.flatten(&target.container, &config)
            } else {
                self.engine.commit(&target.container, &config)
            };
            match result {
                Ok(image) => {
                    debug!("committed {} as {image}", target.container);
                    committed.push(BuiltImage {
                        service: target.service.name.clone(),
                        repository: self.project.image_repository(&target.service.name),
                        image,
                    });
                }
                Err(source) => {
                    self.discard_images(&committed);
                    return Err(CoreError::ServiceBuildFailed {
                        service: target.service.name.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(committed)
    }

    /// Tag every image with the version tag and `latest`. A failed tag
    /// rolls back every reference applied so far.
    fn tag_all(&self, plan: &BuildPlan, images: Vec<BuiltImage>) -> Result<BuildReport, CoreError> {
        let mut applied: Vec<String> = Vec::with_capacity(images.len() * 2);
        for built in &images {
            for tag in [plan.version_tag.as_str(), "latest"] {
                if let Err(source) = self.engine.tag(&built.image, &built.repository, tag) {
                    self.untag_all(&applied);
                    self.discard_images(&images);
                    return Err(CoreError::ServiceBuildFailed {
                        service: built.service.to_string(),
                        source,
                    });
                }
                applied.push(format!("{}:{tag}", built.repository));
            }
        }
        for built in &images {
            self.sink.emit(Event::Exported {
                repository: built.repository.clone(),
                image: built.image.clone(),
            });
        }
        Ok(BuildReport {
            images,
            version_tag: plan.version_tag.clone(),
        })
    }

    fn untag_all(&self, references: &[String]) {
        for reference in references {
            if let Err(e) = self.engine.untag(reference) {
                warn!("failed to untag {reference}: {e}");
            }
        }
    }

    fn discard_images(&self, images: &[BuiltImage]) {
        for built in images {
            match self.engine.remove_image(&built.image) {
                // Dropping its last tag may already have removed it.
                Ok(()) | Err(EngineError::NoSuchImage(_)) => {}
                Err(e) => warn!("failed to remove intermediate image {}: {e}", built.image),
            }
        }
    }

    /// Remove the build containers and the conductor. Containers that were
    /// never created are skipped.
    fn teardown(&self, targets: &[Target<'_>], conductor: &ContainerName) {
        let names = targets.iter().map(|t| &t.container).chain(Some(conductor));
        for name in names {
            match self.engine.inspect(name) {
                Ok(None) => continue,
                Ok(Some(_)) => {}
                Err(e) => warn!("failed to inspect {name}: {e}"),
            }
            let result = self.engine.remove(name);
            if let Err(e) = &result {
                warn!("failed to remove {name}: {e}");
            }
            self.sink
                .emit(Event::transition(Verb::Removing, name, Outcome::of(&result)));
        }
    }

    fn build_container_spec(&self, target: &Target<'_>) -> ContainerSpec {
        let service = target.service;
        let mut env = service.env_strings();
        env.push(BUILD_MARKER_ENV.to_owned());
        ContainerSpec {
            name: target.container.to_string(),
            image: service.source.image().to_owned(),
            command: Some(KEEP_ALIVE.iter().map(|s| (*s).to_owned()).collect()),
            entrypoint: None,
            env,
            volumes: service
                .volumes
                .iter()
                .map(|v| host_mount(self.project, v))
                .collect(),
            ports: Vec::new(),
            working_dir: service.working_dir.clone(),
            labels: service_labels(self.project, &service.name),
        }
    }

    fn conductor_spec(&self, plan: &BuildPlan, conductor: &ContainerName) -> ContainerSpec {
        let mut volumes = vec![
            format!(
                "{}:{CONDUCTOR_PROVISIONING_PATH}:ro",
                self.project.provisioning_root.display()
            ),
            format!(
                "{socket}:{socket}",
                socket = self.settings.engine_socket
            ),
        ];
        volumes.extend(plan.volumes.iter().map(ToString::to_string));

        let command = vec![
            "ansible-playbook".to_owned(),
            "-i".to_owned(),
            "/etc/ansible/dynamic_inventory".to_owned(),
            format!("{CONDUCTOR_PROVISIONING_PATH}/{PLAYBOOK}"),
            "--extra-vars".to_owned(),
            plan.variables.to_json(),
        ];

        ContainerSpec {
            name: conductor.to_string(),
            image: self.settings.conductor_image.clone(),
            command: Some(command),
            entrypoint: None,
            env: plan.variables.to_env(),
            volumes,
            ports: Vec::new(),
            working_dir: Some(CONDUCTOR_PROVISIONING_PATH.to_owned()),
            labels: service_labels(self.project, CONDUCTOR_SERVICE),
        }
    }

    fn image_config(&self, service: &Service) -> ImageConfig {
        ImageConfig {
            command: service.command.clone(),
            entrypoint: service.entrypoint.clone(),
            env: service.env_strings(),
            working_dir: service.working_dir.clone(),
            exposed_ports: service
                .ports
                .iter()
                .map(|p| format!("{}/{}", p.container_port, p.protocol.as_str()))
                .collect(),
            labels: service_labels(self.project, &service.name),
        }
    }
}
