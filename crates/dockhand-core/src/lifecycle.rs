use crate::config::Settings;
use crate::events::{output_source, Event, EventSink, Outcome, Stream, Verb};
use crate::scope::{phases, Direction, RunInstance, Scope};
use crate::{ensure_available, host_mount, service_labels, shutdown_requested, CoreError};
use dockhand_engine::{ContainerEngine, ContainerSpec, EngineError};
use dockhand_schema::{ContainerName, PortMapping, Project, ServiceName};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const ATTACH_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Run,
    Stop,
    Kill,
    Restart,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("run"),
            Self::Stop => f.write_str("stop"),
            Self::Kill => f.write_str("kill"),
            Self::Restart => f.write_str("restart"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOptions {
    pub detached: bool,
    /// Turns a stop into a kill.
    pub force: bool,
}

/// Result of an action on one service's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub service: ServiceName,
    pub container: ContainerName,
    pub result: Result<(), String>,
    /// Exit code observed while attached.
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub action: Action,
    pub outcomes: Vec<ServiceOutcome>,
    pub interrupted: bool,
}

impl ActionReport {
    pub fn failed(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed().next().is_none()
    }

    /// Fail in aggregate once every per-container outcome is known.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.interrupted {
            return Err(CoreError::Interrupted);
        }
        let failed: Vec<String> = self
            .failed()
            .map(|o| match &o.result {
                Err(reason) => format!("{} ({reason})", o.container),
                Ok(()) => o.container.to_string(),
            })
            .collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::LifecycleActionFailure {
                action: self.action.to_string(),
                failed,
            })
        }
    }
}

enum RunStep {
    Created,
    Recreated,
    UpToDate,
}

/// Applies run, stop, kill, and restart to the containers of a scope.
///
/// Services are processed in dependency phases; the containers of one phase
/// are handled concurrently, one worker each, and their status lines are
/// emitted in order once the phase completes.
pub struct LifecycleManager<'a> {
    project: &'a Project,
    engine: &'a dyn ContainerEngine,
    sink: &'a dyn EventSink,
    grace: Duration,
    interrupted: &'a (dyn Fn() -> bool + Sync),
}

impl<'a> LifecycleManager<'a> {
    pub fn new(
        project: &'a Project,
        engine: &'a dyn ContainerEngine,
        sink: &'a dyn EventSink,
        settings: &Settings,
    ) -> Self {
        Self {
            project,
            engine,
            sink,
            grace: settings.stop_timeout(),
            interrupted: &shutdown_requested,
        }
    }

    /// Replace the process-wide Ctrl-C flag polled while attached.
    #[must_use]
    pub fn with_interrupt(mut self, flag: &'a (dyn Fn() -> bool + Sync)) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn run(&self, scope: &Scope, detached: bool) -> Result<ActionReport, CoreError> {
        self.apply(
            Action::Run,
            scope,
            ActionOptions {
                detached,
                force: false,
            },
        )
    }

    pub fn stop(&self, scope: &Scope, force: bool) -> Result<ActionReport, CoreError> {
        self.apply(
            Action::Stop,
            scope,
            ActionOptions {
                detached: false,
                force,
            },
        )
    }

    pub fn restart(&self, scope: &Scope) -> Result<ActionReport, CoreError> {
        self.apply(Action::Restart, scope, ActionOptions::default())
    }

    pub fn apply(
        &self,
        action: Action,
        scope: &Scope,
        options: ActionOptions,
    ) -> Result<ActionReport, CoreError> {
        let action = match action {
            Action::Stop if options.force => Action::Kill,
            other => other,
        };
        let instance = RunInstance::new(
            self.project,
            scope,
            options.detached || action == Action::Restart,
        )?;
        ensure_available(self.engine)?;
        info!("{action} {} container(s)", instance.entries.len());

        let report = match action {
            Action::Run => self.run_instance(&instance),
            Action::Stop => self.halt_instance(&instance, false),
            Action::Kill => self.halt_instance(&instance, true),
            Action::Restart => self.restart_instance(&instance),
        };
        report.into_result()
    }

    /// Run `op` for every container of the instance, phase by phase, and
    /// hand each result to `report` in phase order.
    fn execute<T, F, R>(
        &self,
        instance: &RunInstance,
        direction: Direction,
        op: F,
        mut report: R,
    ) -> BTreeMap<usize, T>
    where
        T: Send,
        F: Fn(usize, &ContainerName) -> T + Sync,
        R: FnMut(&ContainerName, &T),
    {
        let mut results = BTreeMap::new();
        for phase in phases(self.project, &instance.indices(), direction) {
            let members: Vec<(usize, &ContainerName)> = phase
                .iter()
                .filter_map(|&i| instance.container(i).map(|c| (i, c)))
                .collect();
            let finished: Vec<(usize, &ContainerName, T)> = thread::scope(|s| {
                let workers: Vec<_> = members
                    .iter()
                    .map(|&(i, container)| {
                        let op = &op;
                        (i, container, s.spawn(move || op(i, container)))
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|(i, container, worker)| {
                        let value = worker
                            .join()
                            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                        (i, container, value)
                    })
                    .collect()
            });
            for (i, container, value) in finished {
                report(container, &value);
                results.insert(i, value);
            }
        }
        results
    }

    fn outcome(
        &self,
        instance: &RunInstance,
        index: usize,
        result: Result<(), String>,
        exit_code: Option<i64>,
    ) -> Option<ServiceOutcome> {
        let (_, service, container) = instance.entries.iter().find(|(i, _, _)| *i == index)?;
        Some(ServiceOutcome {
            service: service.clone(),
            container: container.clone(),
            result,
            exit_code,
        })
    }

    fn bring_up(&self, index: usize, container: &ContainerName) -> Result<RunStep, EngineError> {
        let spec = self.container_spec(index, container);
        match self.engine.inspect(container)? {
            Some(info) if info.status.is_running() => Ok(RunStep::UpToDate),
            Some(_) => {
                self.engine.remove(container)?;
                self.engine.create(&spec)?;
                self.engine.start(container)?;
                Ok(RunStep::Recreated)
            }
            None => {
                self.engine.create(&spec)?;
                self.engine.start(container)?;
                Ok(RunStep::Created)
            }
        }
    }

    /// Stop or kill a running container. Returns whether anything was done.
    fn halt(&self, container: &ContainerName, force: bool) -> Result<bool, EngineError> {
        match self.engine.inspect(container)? {
            Some(info) if info.status.is_running() => {
                if force {
                    self.engine.kill(container)?;
                } else {
                    self.engine.stop(container, self.grace)?;
                }
                Ok(true)
            }
            _ => {
                debug!("{container} is not running");
                Ok(false)
            }
        }
    }

    fn start_all(
        &self,
        instance: &RunInstance,
        quiet: bool,
    ) -> BTreeMap<usize, Result<RunStep, EngineError>> {
        self.execute(
            instance,
            Direction::Forward,
            |i, container| self.bring_up(i, container),
            |container, result| {
                if quiet {
                    return;
                }
                let event = match result {
                    Ok(RunStep::UpToDate) => Event::UpToDate {
                        container: container.clone(),
                    },
                    Ok(RunStep::Recreated) => {
                        Event::transition(Verb::Recreating, container, Outcome::Done)
                    }
                    Ok(RunStep::Created) => {
                        Event::transition(Verb::Creating, container, Outcome::Done)
                    }
                    Err(e) => {
                        warn!("failed to start {container}: {e}");
                        Event::transition(Verb::Creating, container, Outcome::Error)
                    }
                };
                self.sink.emit(event);
            },
        )
    }

    fn halt_all(
        &self,
        instance: &RunInstance,
        force: bool,
        quiet: bool,
    ) -> BTreeMap<usize, Result<bool, EngineError>> {
        let verb = if force { Verb::Killing } else { Verb::Stopping };
        self.execute(
            instance,
            Direction::Reverse,
            |_, container| self.halt(container, force),
            |container, result| {
                if let Err(e) = result {
                    warn!("failed to {} {container}: {e}", if force { "kill" } else { "stop" });
                }
                if quiet || matches!(result, Ok(false)) {
                    return;
                }
                self.sink
                    .emit(Event::transition(verb, container, Outcome::of(result)));
            },
        )
    }

    fn run_instance(&self, instance: &RunInstance) -> ActionReport {
        if instance.detached {
            self.sink.emit(Event::Detached);
        }
        let started = self.start_all(instance, false);

        let mut outcomes = Vec::new();
        let mut attach = Vec::new();
        for (&i, result) in &started {
            match result {
                Ok(_) => attach.push(i),
                Err(e) => outcomes.extend(self.outcome(instance, i, Err(e.to_string()), None)),
            }
        }

        let mut interrupted = false;
        if instance.detached {
            for i in attach {
                outcomes.extend(self.outcome(instance, i, Ok(()), None));
            }
        } else {
            let (exits, was_interrupted) = self.attach(instance, &attach);
            interrupted = was_interrupted;
            for (i, exit) in exits {
                let outcome = match exit {
                    Ok(0) => self.outcome(instance, i, Ok(()), Some(0)),
                    Ok(code) => {
                        self.outcome(instance, i, Err(format!("exited with code {code}")), Some(code))
                    }
                    Err(e) => self.outcome(instance, i, Err(e.to_string()), None),
                };
                outcomes.extend(outcome);
            }
        }

        outcomes.sort_by_key(|o| self.project.services.iter().position(|s| s.name == o.service));
        ActionReport {
            action: Action::Run,
            outcomes,
            interrupted,
        }
    }

    /// Wait for every attached container, printing its output as it exits.
    ///
    /// An interrupt stops every container that has not exited yet.
    fn attach(
        &self,
        instance: &RunInstance,
        indices: &[usize],
    ) -> (Vec<(usize, Result<i64, EngineError>)>, bool) {
        let members: Vec<(usize, &ContainerName)> = indices
            .iter()
            .filter_map(|&i| instance.container(i).map(|c| (i, c)))
            .collect();
        let engine = self.engine;

        thread::scope(|s| {
            let (tx, rx) = mpsc::channel();
            for &(i, container) in &members {
                let tx = tx.clone();
                s.spawn(move || {
                    let result = engine
                        .wait(container)
                        .and_then(|code| engine.logs(container).map(|logs| (code, logs)));
                    let _ = tx.send((i, result));
                });
            }
            drop(tx);

            let mut exits = Vec::with_capacity(members.len());
            let mut interrupted = false;
            while exits.len() < members.len() {
                match rx.recv_timeout(ATTACH_POLL) {
                    Ok((i, result)) => {
                        let exit = match members.iter().find(|(j, _)| *j == i) {
                            Some(&(_, container)) => self.report_exit(container, result),
                            None => result.map(|(code, _)| code),
                        };
                        exits.push((i, exit));
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                // A signal can also make every pending wait fail at once.
                if !interrupted && (self.interrupted)() {
                    interrupted = true;
                    self.stop_remaining(&members);
                }
            }
            if !interrupted && (self.interrupted)() {
                interrupted = true;
                self.stop_remaining(&members);
            }
            (exits, interrupted)
        })
    }

    fn report_exit(
        &self,
        container: &ContainerName,
        result: Result<(i64, String), EngineError>,
    ) -> Result<i64, EngineError> {
        let (code, logs) = result?;
        let source = output_source(container, &self.project.namespace);
        for line in logs.lines() {
            self.sink.emit(Event::Output {
                source: source.clone(),
                line: line.to_owned(),
            });
        }
        self.sink.emit(Event::Exited {
            container: container.clone(),
            code,
            stream: Stream::Stdout,
        });
        Ok(code)
    }

    /// Stop every attached container the engine still reports as running.
    fn stop_remaining(&self, members: &[(usize, &ContainerName)]) {
        warn!("interrupted; stopping attached containers");
        for &(_, container) in members.iter().rev() {
            let running = match self.engine.inspect(container) {
                Ok(info) => info.is_some_and(|c| c.status.is_running()),
                Err(e) => {
                    warn!("failed to inspect {container}: {e}");
                    true
                }
            };
            if !running {
                continue;
            }
            let result = self.engine.stop(container, self.grace);
            if let Err(e) = &result {
                warn!("failed to stop {container}: {e}");
            }
            self.sink
                .emit(Event::transition(Verb::Stopping, container, Outcome::of(&result)));
        }
    }

    fn halt_instance(&self, instance: &RunInstance, force: bool) -> ActionReport {
        let halted = self.halt_all(instance, force, false);
        let mut outcomes: Vec<ServiceOutcome> = halted
            .into_iter()
            .filter_map(|(i, result)| {
                self.outcome(instance, i, result.map(|_| ()).map_err(|e| e.to_string()), None)
            })
            .collect();
        outcomes.sort_by_key(|o| self.project.services.iter().position(|s| s.name == o.service));
        ActionReport {
            action: if force { Action::Kill } else { Action::Stop },
            outcomes,
            interrupted: false,
        }
    }

    /// Stop then start the scope without status lines, then report one
    /// `Restarting` line per container in declaration order.
    fn restart_instance(&self, instance: &RunInstance) -> ActionReport {
        let halted = self.halt_all(instance, false, true);
        let started = self.start_all(instance, true);

        let mut outcomes = Vec::with_capacity(instance.entries.len());
        for (i, _, container) in &instance.entries {
            let halt = halted.get(i).map_or(Ok(()), |r| {
                r.as_ref().map(|_| ()).map_err(ToString::to_string)
            });
            let start = started.get(i).map_or(Ok(()), |r| {
                r.as_ref().map(|_| ()).map_err(ToString::to_string)
            });
            let result = halt.and(start);
            self.sink.emit(Event::transition(
                Verb::Restarting,
                container,
                Outcome::of(&result),
            ));
            outcomes.extend(self.outcome(instance, *i, result, None));
        }
        ActionReport {
            action: Action::Restart,
            outcomes,
            interrupted: false,
        }
    }

    fn container_spec(&self, index: usize, container: &ContainerName) -> ContainerSpec {
        let service = &self.project.services[index];
        ContainerSpec {
            name: container.to_string(),
            image: self.project.run_image(service),
            command: service.command.clone(),
            entrypoint: service.entrypoint.clone(),
            env: service.env_strings(),
            volumes: service
                .volumes
                .iter()
                .map(|v| host_mount(self.project, v))
                .collect(),
            ports: service.published_ports().map(publish_spec).collect(),
            working_dir: service.working_dir.clone(),
            labels: service_labels(self.project, &service.name),
        }
    }
}

/// Engine `--publish` syntax: `[ip:][host:]container/proto`.
fn publish_spec(port: &PortMapping) -> String {
    let proto = port.protocol.as_str();
    let container = port.container_port;
    match (&port.host_ip, port.host_port) {
        (Some(ip), Some(host)) => format!("{ip}:{host}:{container}/{proto}"),
        (Some(ip), None) => format!("{ip}::{container}/{proto}"),
        (None, Some(host)) => format!("{host}:{container}/{proto}"),
        (None, None) => format!("{container}/{proto}"),
    }
}
