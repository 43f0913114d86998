//! Deployment artifact generation for Dockhand ("shipit").
//!
//! A `Renderer` turns a normalized `Project` into a `ManifestSet` for one
//! orchestration platform. Renderers are looked up by platform name in a
//! `RendererRegistry`; the rendered set is either saved as a single YAML
//! document under the provisioning root or submitted to a cluster through a
//! `ClusterClient`.

pub mod config;
pub mod http;
pub mod kubernetes;
pub mod manifest;
pub mod openshift;
mod pod;
pub mod registry;
pub mod save;
pub mod submit;

pub use config::ClusterConfig;
pub use http::HttpClusterClient;
pub use kubernetes::KubernetesRenderer;
pub use manifest::{Manifest, ManifestSet, ResourceKind};
pub use openshift::OpenShiftRenderer;
pub use registry::{RenderOptions, Renderer, RendererRegistry};
pub use save::{artifact_path, save_manifests, ARTIFACT_FILE_NAME, SHIPIT_CONFIG_DIR};
pub use submit::{submit, ClusterClient, SubmissionOutcome, SubmissionReport, SubmissionStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShipitError {
    #[error("shipit I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown platform '{name}' (available: {available})")]
    UnknownPlatform { name: String, available: String },
    #[error("cannot render service '{service}': {reason}")]
    Render { service: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("cluster config error: {0}")]
    Config(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("cluster rejected '{name}': {reason}")]
    Rejected { name: String, reason: String },
    #[error("submission failed for: {}", failed.join(", "))]
    Submission { failed: Vec<String> },
}
