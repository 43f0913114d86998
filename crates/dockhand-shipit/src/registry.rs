use crate::kubernetes::KubernetesRenderer;
use crate::manifest::ManifestSet;
use crate::openshift::OpenShiftRenderer;
use crate::ShipitError;
use dockhand_schema::Project;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Tag of the exported images referenced by built services.
    pub tag: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            tag: "latest".to_owned(),
        }
    }
}

/// Converts a project into the documents of one orchestration platform.
///
/// Rendering is pure: the same project and options always yield the same set.
pub trait Renderer: Send + Sync {
    /// Canonical platform name, also the directory name used when saving.
    fn platform(&self) -> &'static str;

    /// Additional names accepted on the command line.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn render(&self, project: &Project, options: &RenderOptions) -> Result<ManifestSet, ShipitError>;
}

/// Renderers keyed by platform name.
pub struct RendererRegistry {
    renderers: Vec<Box<dyn Renderer>>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(KubernetesRenderer));
        registry.register(Box::new(OpenShiftRenderer));
        registry
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            renderers: Vec::new(),
        }
    }

    /// Add a renderer. A later registration for the same name takes precedence.
    pub fn register(&mut self, renderer: Box<dyn Renderer>) {
        debug!("registering renderer for {}", renderer.platform());
        self.renderers.insert(0, renderer);
    }

    pub fn platforms(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.renderers.iter().map(|r| r.platform()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn resolve(&self, name: &str) -> Result<&dyn Renderer, ShipitError> {
        let wanted = name.to_ascii_lowercase();
        self.renderers
            .iter()
            .find(|r| r.platform() == wanted || r.aliases().iter().any(|a| *a == wanted))
            .map(AsRef::as_ref)
            .ok_or_else(|| ShipitError::UnknownPlatform {
                name: name.to_owned(),
                available: self.platforms().join(", "),
            })
    }

    pub fn render(
        &self,
        project: &Project,
        platform: &str,
        options: &RenderOptions,
    ) -> Result<ManifestSet, ShipitError> {
        self.resolve(platform)?.render(project, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResourceKind;
    use serde_json::json;

    struct ComposeRenderer;

    impl Renderer for ComposeRenderer {
        fn platform(&self) -> &'static str {
            "compose"
        }

        fn render(&self, project: &Project, _options: &RenderOptions) -> Result<ManifestSet, ShipitError> {
            let mut set = ManifestSet::new(self.platform());
            for service in &project.services {
                set.push(
                    service.name.to_string(),
                    ResourceKind::Workload,
                    &service.name,
                    json!({ "image": service.source.image() }),
                );
            }
            Ok(set)
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_platforms() {
        let registry = RendererRegistry::new();
        for name in ["kubernetes", "kube", "k8s", "KUBE"] {
            assert_eq!(registry.resolve(name).unwrap().platform(), "kubernetes");
        }
        for name in ["openshift", "oc"] {
            assert_eq!(registry.resolve(name).unwrap().platform(), "openshift");
        }
    }

    #[test]
    fn unknown_platform_lists_available() {
        let registry = RendererRegistry::new();
        let err = registry.resolve("nomad").err().unwrap();
        assert_eq!(
            err.to_string(),
            "unknown platform 'nomad' (available: kubernetes, openshift)"
        );
    }

    #[test]
    fn new_platforms_plug_in() {
        let mut registry = RendererRegistry::new();
        registry.register(Box::new(ComposeRenderer));
        let project = Project::from_yaml("demo", "ansible", "version: 1\nservices:\n  web:\n    image: nginx\n").unwrap();
        let set = registry.render(&project, "compose", &RenderOptions::default()).unwrap();
        assert_eq!(set.platform, "compose");
        assert_eq!(set.len(), 1);
        assert_eq!(registry.platforms(), vec!["compose", "kubernetes", "openshift"]);
    }
}
