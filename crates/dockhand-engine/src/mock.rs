use crate::backend::{ContainerEngine, ContainerInfo, ContainerSpec, ContainerStatus, ImageConfig};
use crate::EngineError;
use dockhand_schema::ImageId;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Exit code reported for a killed container (128 + SIGKILL).
pub const KILLED_EXIT_CODE: i64 = 137;

/// One engine operation as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCall {
    pub op: String,
    pub target: String,
}

impl EngineCall {
    pub fn new(op: &str, target: &str) -> Self {
        Self {
            op: op.to_owned(),
            target: target.to_owned(),
        }
    }
}

/// Scripted behaviour applied to containers by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockScript {
    pub exit_codes: BTreeMap<String, i64>,
    pub logs: BTreeMap<String, String>,
    /// `op:target` pairs that fail with an injected fault.
    pub failures: BTreeSet<String>,
    /// Containers whose `wait` blocks until they are stopped or killed.
    pub held: BTreeSet<String>,
    pub missing_images: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockContainer {
    id: String,
    spec: ContainerSpec,
    status: ContainerStatus,
    image_layers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockImage {
    layers: usize,
    config: ImageConfig,
    source: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    images: BTreeMap<String, MockImage>,
    tags: BTreeMap<String, String>,
    sequence: u64,
    script: MockScript,
    /// Calls made through this handle only; never written to the state file.
    #[serde(skip)]
    journal: Vec<EngineCall>,
}

impl MockState {
    fn next_digest(&mut self, seed: &str) -> String {
        self.sequence += 1;
        blake3::hash(format!("{seed}:{}", self.sequence).as_bytes())
            .to_hex()
            .to_string()
    }

    fn container_mut(&mut self, name: &str) -> Result<&mut MockContainer, EngineError> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NoSuchContainer(name.to_owned()))
    }

    fn resolve_image(&self, reference: &str) -> Option<&MockImage> {
        let id = self.tags.get(reference).map_or(reference, String::as_str);
        self.images.get(id)
    }

    fn image_present(&self, reference: &str) -> bool {
        self.resolve_image(reference).is_some() || !self.script.missing_images.contains(reference)
    }

    fn store_image(&mut self, name: &str, layers: usize, config: &ImageConfig) -> ImageId {
        let id = format!("sha256:{}", self.next_digest(&format!("image:{name}")));
        self.images.insert(
            id.clone(),
            MockImage {
                layers,
                config: config.clone(),
                source: name.to_owned(),
            },
        );
        ImageId::new(id)
    }

    fn info(container: &MockContainer) -> ContainerInfo {
        ContainerInfo {
            id: container.id.clone(),
            name: container.spec.name.clone(),
            image: container.spec.image.clone(),
            status: container.status,
            env: container.spec.env.clone(),
            mounts: container.spec.volumes.clone(),
            labels: container.spec.labels.clone(),
        }
    }
}

struct StateLock {
    lock_file: File,
}

impl StateLock {
    fn acquire(lock_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

fn poisoned<T>(e: PoisonError<T>) -> EngineError {
    EngineError::State(format!("mutex poisoned: {e}"))
}

/// In-memory container engine.
///
/// Records every operation in a journal, supports scripted exit codes, log
/// output and fault injection, and can persist its state to a JSON file so
/// that separate processes observe the same containers and images.
pub struct MockEngine {
    state: Mutex<MockState>,
    changed: Condvar,
    store: Option<PathBuf>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
            store: None,
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose state lives in `path`, guarded by an advisory file lock.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Some(path.into()),
            ..Self::default()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, EngineError> {
        self.state.lock().map_err(poisoned)
    }

    fn transact<R>(
        &self,
        f: impl FnOnce(&mut MockState) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut state = self.lock()?;
        let _file_lock = match &self.store {
            Some(path) => {
                let guard = StateLock::acquire(&path.with_extension("lock"))?;
                let journal = std::mem::take(&mut state.journal);
                *state = load_state(path)?;
                state.journal = journal;
                Some(guard)
            }
            None => None,
        };
        let result = f(&mut state);
        if let Some(path) = &self.store {
            save_state(path, &state)?;
        }
        drop(state);
        self.changed.notify_all();
        result
    }

    /// Journal the call, apply injected faults, then run `f`.
    fn operate<R>(
        &self,
        op: &str,
        target: &str,
        f: impl FnOnce(&mut MockState) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        self.transact(|state| {
            state.journal.push(EngineCall::new(op, target));
            if state.script.failures.contains(&format!("{op}:{target}")) {
                return Err(EngineError::Injected {
                    op: op.to_owned(),
                    target: target.to_owned(),
                });
            }
            f(state)
        })
    }

    fn script(&self, f: impl FnOnce(&mut MockScript)) -> Result<(), EngineError> {
        self.transact(|state| {
            f(&mut state.script);
            Ok(())
        })
    }

    pub fn set_exit_code(&self, container: &str, code: i64) -> Result<(), EngineError> {
        self.script(|s| {
            s.exit_codes.insert(container.to_owned(), code);
        })
    }

    pub fn set_logs(&self, container: &str, logs: &str) -> Result<(), EngineError> {
        self.script(|s| {
            s.logs.insert(container.to_owned(), logs.to_owned());
        })
    }

    /// Make `op` fail for `target`, e.g. `("commit", "ansible_web_1")`.
    pub fn inject_failure(&self, op: &str, target: &str) -> Result<(), EngineError> {
        self.script(|s| {
            s.failures.insert(format!("{op}:{target}"));
        })
    }

    pub fn clear_failures(&self) -> Result<(), EngineError> {
        self.script(|s| s.failures.clear())
    }

    /// Keep `container` running until it is stopped or killed.
    pub fn hold(&self, container: &str) -> Result<(), EngineError> {
        self.script(|s| {
            s.held.insert(container.to_owned());
        })
    }

    pub fn mark_image_missing(&self, reference: &str) -> Result<(), EngineError> {
        self.script(|s| {
            s.missing_images.insert(reference.to_owned());
        })
    }

    pub fn journal(&self) -> Result<Vec<EngineCall>, EngineError> {
        self.transact(|state| Ok(state.journal.clone()))
    }

    pub fn clear_journal(&self) -> Result<(), EngineError> {
        self.transact(|state| {
            state.journal.clear();
            Ok(())
        })
    }

    /// Layer count of a stored image, by id or tag.
    pub fn image_layers(&self, reference: &str) -> Result<Option<usize>, EngineError> {
        self.transact(|state| Ok(state.resolve_image(reference).map(|i| i.layers)))
    }

    pub fn image_config(&self, reference: &str) -> Result<Option<ImageConfig>, EngineError> {
        self.transact(|state| Ok(state.resolve_image(reference).map(|i| i.config.clone())))
    }

    /// Name of the container an image was committed from.
    pub fn image_source(&self, reference: &str) -> Result<Option<String>, EngineError> {
        self.transact(|state| Ok(state.resolve_image(reference).map(|i| i.source.clone())))
    }

    /// All tag references, sorted.
    pub fn tags(&self) -> Result<Vec<String>, EngineError> {
        self.transact(|state| Ok(state.tags.keys().cloned().collect()))
    }

    fn wait_until_released(&self, name: &str) -> Result<(), EngineError> {
        if self.store.is_some() {
            return Ok(());
        }
        let mut state = self.lock()?;
        while state.script.held.contains(name)
            && state
                .containers
                .get(name)
                .is_some_and(|c| c.status.is_running())
        {
            state = self.changed.wait(state).map_err(poisoned)?;
        }
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<MockState, EngineError> {
    if !path.exists() {
        return Ok(MockState::default());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(MockState::default());
    }
    serde_json::from_str(&content)
        .map_err(|e| EngineError::State(format!("corrupt state file {}: {e}", path.display())))
}

fn save_state(path: &Path, state: &MockState) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| EngineError::State(format!("failed to serialize state: {e}")))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.operate("create", &spec.name, |state| {
            if state.containers.contains_key(&spec.name) {
                return Err(EngineError::AlreadyExists(spec.name.clone()));
            }
            if !state.image_present(&spec.image) {
                return Err(EngineError::NoSuchImage(spec.image.clone()));
            }
            let image_layers = state.resolve_image(&spec.image).map_or(1, |i| i.layers);
            let id = state.next_digest(&format!("container:{}", spec.name));
            state.containers.insert(
                spec.name.clone(),
                MockContainer {
                    id: id.clone(),
                    spec: spec.clone(),
                    status: ContainerStatus::Created,
                    image_layers,
                },
            );
            Ok(id)
        })
    }

    fn start(&self, name: &str) -> Result<(), EngineError> {
        self.operate("start", name, |state| {
            state.container_mut(name)?.status = ContainerStatus::Running;
            Ok(())
        })
    }

    fn wait(&self, name: &str) -> Result<i64, EngineError> {
        self.wait_until_released(name)?;
        self.operate("wait", name, |state| {
            let code = state.script.exit_codes.get(name).copied().unwrap_or(0);
            let container = state.container_mut(name)?;
            match container.status {
                ContainerStatus::Created => Err(EngineError::CommandFailed {
                    op: "wait".to_owned(),
                    target: name.to_owned(),
                    detail: "container has not been started".to_owned(),
                }),
                ContainerStatus::Running => {
                    container.status = ContainerStatus::Exited(code);
                    Ok(code)
                }
                ContainerStatus::Exited(code) => Ok(code),
            }
        })
    }

    fn logs(&self, name: &str) -> Result<String, EngineError> {
        self.operate("logs", name, |state| {
            if !state.containers.contains_key(name) {
                return Err(EngineError::NoSuchContainer(name.to_owned()));
            }
            Ok(state.script.logs.get(name).cloned().unwrap_or_default())
        })
    }

    fn stop(&self, name: &str, _grace: Duration) -> Result<(), EngineError> {
        self.operate("stop", name, |state| {
            let container = state.container_mut(name)?;
            if container.status.is_running() {
                container.status = ContainerStatus::Exited(0);
            }
            Ok(())
        })
    }

    fn kill(&self, name: &str) -> Result<(), EngineError> {
        self.operate("kill", name, |state| {
            let container = state.container_mut(name)?;
            if !container.status.is_running() {
                return Err(EngineError::CommandFailed {
                    op: "kill".to_owned(),
                    target: name.to_owned(),
                    detail: "container is not running".to_owned(),
                });
            }
            container.status = ContainerStatus::Exited(KILLED_EXIT_CODE);
            Ok(())
        })
    }

    fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.operate("remove", name, |state| {
            state
                .containers
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| EngineError::NoSuchContainer(name.to_owned()))
        })
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        self.operate("inspect", name, |state| {
            Ok(state.containers.get(name).map(MockState::info))
        })
    }

    fn list(&self, namespace: &str) -> Result<Vec<ContainerInfo>, EngineError> {
        let prefix = format!("{namespace}_");
        self.operate("list", namespace, |state| {
            Ok(state
                .containers
                .values()
                .filter(|c| c.spec.name.starts_with(&prefix))
                .map(MockState::info)
                .collect())
        })
    }

    fn commit(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError> {
        self.operate("commit", name, |state| {
            let layers = state.container_mut(name)?.image_layers + 1;
            Ok(state.store_image(name, layers, config))
        })
    }

    fn flatten(&self, name: &str, config: &ImageConfig) -> Result<ImageId, EngineError> {
        self.operate("flatten", name, |state| {
            state.container_mut(name)?;
            Ok(state.store_image(name, 1, config))
        })
    }

    fn tag(&self, image: &ImageId, repository: &str, tag: &str) -> Result<(), EngineError> {
        let reference = format!("{repository}:{tag}");
        self.operate("tag", &reference, |state| {
            if !state.images.contains_key(image.as_str()) {
                return Err(EngineError::NoSuchImage(image.to_string()));
            }
            state.tags.insert(reference.clone(), image.to_string());
            state.script.missing_images.remove(&reference);
            Ok(())
        })
    }

    fn untag(&self, reference: &str) -> Result<(), EngineError> {
        self.operate("untag", reference, |state| {
            state
                .tags
                .remove(reference)
                .map(|_| ())
                .ok_or_else(|| EngineError::NoSuchImage(reference.to_owned()))
        })
    }

    /// Like `docker rmi` without `--force`: an image still referenced by
    /// more than one tag is refused.
    fn remove_image(&self, image: &ImageId) -> Result<(), EngineError> {
        self.operate("remove image", image, |state| {
            if !state.images.contains_key(image.as_str()) {
                return Err(EngineError::NoSuchImage(image.to_string()));
            }
            let references = state.tags.values().filter(|id| *id == image.as_str()).count();
            if references > 1 {
                return Err(EngineError::CommandFailed {
                    op: "remove image".to_owned(),
                    target: image.to_string(),
                    detail: "image is referenced in multiple repositories".to_owned(),
                });
            }
            state.images.remove(image.as_str());
            state.tags.retain(|_, id| id != image.as_str());
            Ok(())
        })
    }

    fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        self.operate("image exists", reference, |state| {
            Ok(state.image_present(reference))
        })
    }
}
