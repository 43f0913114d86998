//! Pieces shared by every platform renderer.

use crate::ShipitError;
use dockhand_schema::{PortMapping, Project, Service, ServiceSource, VolumeMount};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub(crate) fn labels(project: &Project, service: &Service) -> Value {
    json!({
        "app": project.name,
        "service": service.name.as_str(),
    })
}

/// Service names may carry `_`; platform object names are DNS-1123 labels.
pub(crate) fn object_name(service: &Service) -> String {
    service.name.replace('_', "-")
}

pub(crate) fn metadata(project: &Project, service: &Service) -> Value {
    json!({
        "name": object_name(service),
        "labels": labels(project, service),
    })
}

pub(crate) fn image(project: &Project, service: &Service, tag: &str) -> String {
    match &service.source {
        ServiceSource::Build { .. } => format!("{}:{tag}", project.image_repository(&service.name)),
        ServiceSource::Image(image) => image.clone(),
    }
}

/// Port names follow the DNS label rules the platforms impose.
pub(crate) fn port_name(port: &PortMapping) -> String {
    format!(
        "port-{}-{}",
        port.service_port(),
        port.protocol.as_str()
    )
}

fn volume_name(service: &Service, index: usize) -> String {
    format!("{}-volume{}", object_name(service), index + 1)
}

fn volume_source(volume: &VolumeMount) -> Value {
    match volume.source.as_deref() {
        None => json!({ "emptyDir": {} }),
        Some(path) if volume.is_host_path() => json!({ "hostPath": { "path": path } }),
        Some(claim) => json!({ "persistentVolumeClaim": { "claimName": claim } }),
    }
}

fn container(project: &Project, service: &Service, tag: &str) -> Value {
    let mut container = Map::new();
    container.insert("name".to_owned(), json!(object_name(service)));
    container.insert("image".to_owned(), json!(image(project, service, tag)));
    if let Some(entrypoint) = &service.entrypoint {
        container.insert("command".to_owned(), json!(entrypoint));
    }
    if let Some(command) = &service.command {
        container.insert("args".to_owned(), json!(command));
    }
    if let Some(dir) = &service.working_dir {
        container.insert("workingDir".to_owned(), json!(dir));
    }
    if !service.environment.is_empty() {
        let env: Vec<Value> = service
            .environment
            .iter()
            .map(|e| json!({ "name": e.name, "value": e.value }))
            .collect();
        container.insert("env".to_owned(), Value::Array(env));
    }
    if !service.ports.is_empty() {
        let ports: Vec<Value> = service
            .ports
            .iter()
            .map(|p| {
                json!({
                    "containerPort": p.container_port,
                    "protocol": p.protocol.manifest_name(),
                })
            })
            .collect();
        container.insert("ports".to_owned(), Value::Array(ports));
    }
    if !service.volumes.is_empty() {
        let mounts: Vec<Value> = service
            .volumes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut mount = json!({
                    "name": volume_name(service, i),
                    "mountPath": v.target,
                });
                if v.is_read_only() {
                    mount["readOnly"] = json!(true);
                }
                mount
            })
            .collect();
        container.insert("volumeMounts".to_owned(), Value::Array(mounts));
    }
    Value::Object(container)
}

/// Pod template shared by Deployment and DeploymentConfig.
pub(crate) fn pod_template(project: &Project, service: &Service, tag: &str) -> Value {
    let mut spec = json!({ "containers": [container(project, service, tag)] });
    if !service.volumes.is_empty() {
        let volumes: Vec<Value> = service
            .volumes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut volume = volume_source(v);
                volume["name"] = json!(volume_name(service, i));
                volume
            })
            .collect();
        spec["volumes"] = Value::Array(volumes);
    }
    json!({
        "metadata": { "labels": labels(project, service) },
        "spec": spec,
    })
}

pub(crate) fn service_ports(service: &Service) -> Vec<Value> {
    service
        .ports
        .iter()
        .map(|p| {
            json!({
                "name": port_name(p),
                "port": p.service_port(),
                "targetPort": p.container_port,
                "protocol": p.protocol.manifest_name(),
            })
        })
        .collect()
}

pub(crate) fn replicas(service: &Service, platform: &str) -> Result<u32, ShipitError> {
    match service.replicas(platform) {
        Some(0) => Err(ShipitError::Render {
            service: service.name.to_string(),
            reason: format!("replicas for {platform} must be at least 1"),
        }),
        Some(n) => Ok(n),
        None => Ok(1),
    }
}

/// Reject projects no platform can express.
pub(crate) fn validate(project: &Project) -> Result<(), ShipitError> {
    validate_names(project)?;
    validate_ports(project)
}

/// Two services must not collapse onto one object name.
fn validate_names(project: &Project) -> Result<(), ShipitError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for service in &project.services {
        if let Some(other) = seen.insert(object_name(service), service.name.as_str()) {
            return Err(ShipitError::Render {
                service: service.name.to_string(),
                reason: format!(
                    "object name '{}' is already used by '{other}'",
                    object_name(service)
                ),
            });
        }
    }
    Ok(())
}

/// Reject port layouts no platform can express.
fn validate_ports(project: &Project) -> Result<(), ShipitError> {
    let mut published: BTreeMap<(u16, &str), &str> = BTreeMap::new();
    for service in &project.services {
        let mut seen = Vec::new();
        for port in &service.ports {
            let key = (port.service_port(), port.protocol);
            if seen.contains(&key) {
                return Err(ShipitError::Render {
                    service: service.name.to_string(),
                    reason: format!(
                        "port {}/{} is declared more than once",
                        key.0,
                        port.protocol.as_str()
                    ),
                });
            }
            seen.push(key);

            if let (true, Some(host)) = (port.published, port.host_port) {
                let slot = (host, port.protocol.as_str());
                if let Some(other) = published.insert(slot, service.name.as_str()) {
                    if other != service.name.as_str() {
                        return Err(ShipitError::Render {
                            service: service.name.to_string(),
                            reason: format!(
                                "host port {host}/{} is already published by '{other}'",
                                port.protocol.as_str()
                            ),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(yaml: &str) -> Project {
        Project::from_yaml("demo", "ansible", yaml).unwrap()
    }

    #[test]
    fn container_maps_service_fields() {
        let p = project(
            "version: 1\nservices:\n  web:\n    image: centos:7\n    entrypoint: [\"/entry.sh\"]\n    command: [httpd, -DFOREGROUND]\n    working_dir: /srv\n    environment: [\"A=1\", \"B=2\"]\n    ports: [\"8080:80\"]\n",
        );
        let c = container(&p, &p.services[0], "latest");
        assert_eq!(c["image"], "demo-web:latest");
        assert_eq!(c["command"], json!(["/entry.sh"]));
        assert_eq!(c["args"], json!(["httpd", "-DFOREGROUND"]));
        assert_eq!(c["workingDir"], "/srv");
        assert_eq!(
            c["env"],
            json!([{"name": "A", "value": "1"}, {"name": "B", "value": "2"}])
        );
        assert_eq!(c["ports"], json!([{"containerPort": 80, "protocol": "TCP"}]));
    }

    #[test]
    fn volumes_map_to_platform_sources() {
        let p = project(
            "version: 1\nservices:\n  web:\n    image: nginx\n    build: false\n    volumes: [\"/srv/html:/usr/share/nginx/html:ro\", \"data:/data\", \"/cache\"]\n",
        );
        let template = pod_template(&p, &p.services[0], "latest");
        assert_eq!(
            template["spec"]["volumes"],
            json!([
                {"name": "web-volume1", "hostPath": {"path": "/srv/html"}},
                {"name": "web-volume2", "persistentVolumeClaim": {"claimName": "data"}},
                {"name": "web-volume3", "emptyDir": {}},
            ])
        );
        let mounts = &template["spec"]["containers"][0]["volumeMounts"];
        assert_eq!(mounts[0]["readOnly"], true);
        assert!(mounts[1].get("readOnly").is_none());
        assert_eq!(template["spec"]["containers"][0]["image"], "nginx");
    }

    #[test]
    fn zero_replicas_are_rejected() {
        let p = project(
            "version: 1\nservices:\n  web:\n    image: nginx\n    options:\n      kubernetes:\n        replicas: 0\n      openshift:\n        replicas: 3\n",
        );
        assert!(replicas(&p.services[0], "kubernetes").is_err());
        assert_eq!(replicas(&p.services[0], "openshift").unwrap(), 3);
    }

    #[test]
    fn underscores_become_dashes_in_object_names() {
        let p = project(
            "version: 1\nservices:\n  my_db:\n    image: postgres\n    build: false\n    volumes: [\"/data\"]\n",
        );
        let service = &p.services[0];
        assert_eq!(metadata(&p, service)["name"], "my-db");
        assert_eq!(metadata(&p, service)["labels"]["service"], "my_db");
        let template = pod_template(&p, service, "latest");
        assert_eq!(template["spec"]["containers"][0]["name"], "my-db");
        assert_eq!(template["spec"]["volumes"][0]["name"], "my-db-volume1");
    }

    #[test]
    fn colliding_object_names_are_rejected() {
        let p = project(
            "version: 1\nservices:\n  my_db:\n    image: postgres\n  my-db:\n    image: postgres\n",
        );
        let err = validate(&p).unwrap_err();
        assert!(err.to_string().contains("already used by 'my_db'"));
    }

    #[test]
    fn duplicate_ports_are_rejected() {
        let dup = project(
            "version: 1\nservices:\n  web:\n    image: nginx\n    ports: [\"8080:80\", \"8080:81\"]\n",
        );
        assert!(matches!(
            validate_ports(&dup),
            Err(ShipitError::Render { ref service, .. }) if service == "web"
        ));

        let clash = project(
            "version: 1\nservices:\n  a:\n    image: nginx\n    ports: [\"8080:80\"]\n  b:\n    image: nginx\n    ports: [\"8080:8080\"]\n",
        );
        let err = validate_ports(&clash).unwrap_err();
        assert!(err.to_string().contains("already published by 'a'"));

        let udp = project(
            "version: 1\nservices:\n  a:\n    image: nginx\n    ports: [\"53:53\", \"53:53/udp\"]\n",
        );
        assert!(validate_ports(&udp).is_ok());
    }
}
