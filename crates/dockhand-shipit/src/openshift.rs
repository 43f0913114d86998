use crate::manifest::{ManifestSet, ResourceKind};
use crate::pod;
use crate::registry::{RenderOptions, Renderer};
use crate::ShipitError;
use dockhand_schema::{Project, Service};
use serde_json::{json, Value};

/// DeploymentConfigs, in-cluster Services, and Routes for published ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenShiftRenderer;

const PLATFORM: &str = "openshift";

impl OpenShiftRenderer {
    fn deployment_config(
        project: &Project,
        service: &Service,
        options: &RenderOptions,
    ) -> Result<Value, ShipitError> {
        Ok(json!({
            "apiVersion": "apps.openshift.io/v1",
            "kind": "DeploymentConfig",
            "metadata": pod::metadata(project, service),
            "spec": {
                "replicas": pod::replicas(service, PLATFORM)?,
                "selector": pod::labels(project, service),
                "strategy": { "type": "Rolling" },
                "triggers": [{ "type": "ConfigChange" }],
                "template": pod::pod_template(project, service, &options.tag),
            },
        }))
    }

    fn service(project: &Project, service: &Service) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": pod::metadata(project, service),
            "spec": {
                "type": "ClusterIP",
                "selector": pod::labels(project, service),
                "ports": pod::service_ports(service),
            },
        })
    }

    fn route(project: &Project, service: &Service) -> Option<Value> {
        let port = service.published_ports().next()?;
        Some(json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": pod::metadata(project, service),
            "spec": {
                "to": { "kind": "Service", "name": pod::object_name(service) },
                "port": { "targetPort": pod::port_name(port) },
            },
        }))
    }
}

impl Renderer for OpenShiftRenderer {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["oc"]
    }

    fn render(&self, project: &Project, options: &RenderOptions) -> Result<ManifestSet, ShipitError> {
        pod::validate(project)?;
        let mut set = ManifestSet::new(PLATFORM);
        for service in &project.services {
            set.push(
                format!("{}-deploymentconfig", pod::object_name(service)),
                ResourceKind::Workload,
                &service.name,
                Self::deployment_config(project, service, options)?,
            );
            if !service.ports.is_empty() {
                set.push(
                    format!("{}-service", pod::object_name(service)),
                    ResourceKind::Networking,
                    &service.name,
                    Self::service(project, service),
                );
            }
            if let Some(route) = Self::route(project, service) {
                set.push(
                    format!("{}-route", pod::object_name(service)),
                    ResourceKind::Route,
                    &service.name,
                    route,
                );
            }
        }
        Ok(set)
    }
}
