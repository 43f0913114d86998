use crate::manifest::{ManifestSet, ResourceKind};
use crate::pod;
use crate::registry::{RenderOptions, Renderer};
use crate::ShipitError;
use dockhand_schema::{Project, Service};
use serde_json::{json, Value};

/// `apps/v1` Deployments plus `v1` Services.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubernetesRenderer;

const PLATFORM: &str = "kubernetes";

impl KubernetesRenderer {
    fn deployment(project: &Project, service: &Service, options: &RenderOptions) -> Result<Value, ShipitError> {
        Ok(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": pod::metadata(project, service),
            "spec": {
                "replicas": pod::replicas(service, PLATFORM)?,
                "selector": { "matchLabels": pod::labels(project, service) },
                "template": pod::pod_template(project, service, &options.tag),
            },
        }))
    }

    /// Published ports get an external load balancer; exposed-only ports stay in-cluster.
    fn service(project: &Project, service: &Service) -> Value {
        let service_type = if service.published_ports().next().is_some() {
            "LoadBalancer"
        } else {
            "ClusterIP"
        };
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": pod::metadata(project, service),
            "spec": {
                "type": service_type,
                "selector": pod::labels(project, service),
                "ports": pod::service_ports(service),
            },
        })
    }
}

impl Renderer for KubernetesRenderer {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["kube", "k8s"]
    }

    fn render(&self, project: &Project, options: &RenderOptions) -> Result<ManifestSet, ShipitError> {
        pod::validate(project)?;
        let mut set = ManifestSet::new(PLATFORM);
        for service in &project.services {
            set.push(
                format!("{}-deployment", pod::object_name(service)),
                ResourceKind::Workload,
                &service.name,
                Self::deployment(project, service, options)?,
            );
            if !service.ports.is_empty() {
                set.push(
                    format!("{}-service", pod::object_name(service)),
                    ResourceKind::Networking,
                    &service.name,
                    Self::service(project, service),
                );
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(yaml: &str) -> ManifestSet {
        let project = Project::from_yaml("demo", "ansible", yaml).unwrap();
        KubernetesRenderer
            .render(&project, &RenderOptions::default())
            .unwrap()
    }

    #[test]
    fn networking_only_for_services_with_ports() {
        let set = render(
            "version: 1\nservices:\n  web:\n    image: nginx\n    ports: [\"8080:80\"]\n  worker:\n    image: busybox\n",
        );
        let names: Vec<&str> = set.manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["web-deployment", "web-service", "worker-deployment"]);
        assert!(set.get("web-service").is_some());
        assert!(set.for_service("worker").all(|m| m.kind == ResourceKind::Workload));
    }

    #[test]
    fn service_type_follows_publication() {
        let set = render(
            "version: 1\nservices:\n  web:\n    image: nginx\n    ports: [\"8080:80\"]\n  db:\n    image: postgres\n    expose: [\"5432\"]\n",
        );
        let web = &set.get("web-service").unwrap().document;
        assert_eq!(web["spec"]["type"], "LoadBalancer");
        assert_eq!(
            web["spec"]["ports"],
            json!([{"name": "port-8080-tcp", "port": 8080, "targetPort": 80, "protocol": "TCP"}])
        );
        let db = &set.get("db-service").unwrap().document;
        assert_eq!(db["spec"]["type"], "ClusterIP");
        assert_eq!(db["spec"]["selector"], json!({"app": "demo", "service": "db"}));
    }

    #[test]
    fn deployment_carries_replicas_and_selector() {
        let set = render(
            "version: 1\nservices:\n  web:\n    image: centos:7\n    options:\n      kubernetes:\n        replicas: 2\n",
        );
        let doc = &set.get("web-deployment").unwrap().document;
        assert_eq!(doc["apiVersion"], "apps/v1");
        assert_eq!(doc["spec"]["replicas"], 2);
        assert_eq!(doc["spec"]["selector"]["matchLabels"]["service"], "web");
        assert_eq!(
            doc["spec"]["template"]["spec"]["containers"][0]["image"],
            "demo-web:latest"
        );
    }

    #[test]
    fn object_names_are_dns_labels() {
        let set = render(
            "version: 1\nservices:\n  my_db:\n    image: postgres\n    ports: [\"5432\"]\n",
        );
        let names: Vec<&str> = set.manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["my-db-deployment", "my-db-service"]);
        for manifest in &set.manifests {
            let name = manifest.document["metadata"]["name"].as_str().unwrap();
            assert_eq!(name, "my-db");
        }
        assert_eq!(set.for_service("my_db").count(), 2);
    }

    #[test]
    fn rendering_is_deterministic() {
        let yaml = "version: 1\nservices:\n  web:\n    image: nginx\n    environment:\n      Z: 1\n      A: 2\n    ports: [\"80\"]\n";
        assert_eq!(render(yaml).to_yaml().unwrap(), render(yaml).to_yaml().unwrap());
    }
}
