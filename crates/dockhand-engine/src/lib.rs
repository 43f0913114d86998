//! Container engine adapters for Dockhand.
//!
//! This crate implements the engine capability layer: the `ContainerEngine`
//! trait consumed by the build orchestrator and lifecycle manager, a backend
//! driving the `docker` CLI, and an in-memory mock (optionally persisted to a
//! state file) used by tests and dry runs.

pub mod backend;
pub mod docker;
pub mod mock;

pub use backend::{
    select_engine, ContainerEngine, ContainerInfo, ContainerSpec, ContainerStatus, ImageConfig,
};
pub use docker::DockerEngine;
pub use mock::{EngineCall, MockEngine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    #[error("no such container: {0}")]
    NoSuchContainer(String),
    #[error("no such image: {0}")]
    NoSuchImage(String),
    #[error("container '{0}' already exists")]
    AlreadyExists(String),
    #[error("{op} {target} failed: {detail}")]
    CommandFailed {
        op: String,
        target: String,
        detail: String,
    },
    #[error("{op} {target} failed: injected fault")]
    Injected { op: String, target: String },
    #[error("engine state error: {0}")]
    State(String),
}
