use crate::ShipitError;
use dockhand_schema::ServiceName;
use serde_json::{Map, Value};

/// Role of a document within the set; also its submission phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Workload,
    Networking,
    Route,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Key of the document in the saved artifact, e.g. `web-deployment`.
    pub name: String,
    pub kind: ResourceKind,
    pub service: ServiceName,
    pub document: Value,
}

impl Manifest {
    pub fn api_version(&self) -> Option<&str> {
        self.document.get("apiVersion").and_then(Value::as_str)
    }

    pub fn resource_kind(&self) -> Option<&str> {
        self.document.get("kind").and_then(Value::as_str)
    }
}

/// Every document rendered for one platform, in rendering order.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSet {
    pub platform: String,
    pub manifests: Vec<Manifest>,
}

impl ManifestSet {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_owned(),
            manifests: Vec::new(),
        }
    }

    pub fn push(&mut self, name: String, kind: ResourceKind, service: &ServiceName, document: Value) {
        self.manifests.push(Manifest {
            name,
            kind,
            service: service.clone(),
            document,
        });
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Manifest> {
        self.manifests.iter().find(|m| m.name == name)
    }

    pub fn for_service<'s>(&'s self, service: &'s str) -> impl Iterator<Item = &'s Manifest> + 's {
        self.manifests.iter().filter(move |m| m.service == service)
    }

    /// Workloads first, then the networking objects and routes that select them.
    pub fn submission_order(&self) -> Vec<&Manifest> {
        let mut ordered: Vec<&Manifest> = self.manifests.iter().collect();
        ordered.sort_by_key(|m| m.kind);
        ordered
    }

    /// A single mapping from document name to document.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .manifests
            .iter()
            .map(|m| (m.name.clone(), m.document.clone()))
            .collect();
        Value::Object(map)
    }

    pub fn to_yaml(&self) -> Result<String, ShipitError> {
        serde_yaml::to_string(&self.to_value()).map_err(|e| ShipitError::Serialization(e.to_string()))
    }
}
