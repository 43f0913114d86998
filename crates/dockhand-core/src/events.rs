//! Status events and the sinks that render them.
//!
//! Each event renders to exactly one line on a fixed stream. The wording
//! mirrors the status output of compose-style tooling so that success or
//! failure can be read off the output alone.

use console::style;
use dockhand_schema::{ContainerName, ImageId};
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Error,
}

impl Outcome {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Done
        } else {
            Self::Error
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A per-container state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Creating,
    Recreating,
    Starting,
    Stopping,
    Killing,
    Restarting,
    Removing,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Recreating => "Recreating",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Killing => "Killing",
            Self::Restarting => "Restarting",
            Self::Removing => "Removing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `Stopping ansible_web_1 ... done`
    Transition {
        verb: Verb,
        container: ContainerName,
        outcome: Outcome,
    },
    UpToDate { container: ContainerName },
    /// One line of container output, prefixed with its short container name.
    Output { source: String, line: String },
    Exited {
        container: ContainerName,
        code: i64,
        stream: Stream,
    },
    AbortingOnExit,
    Exporting,
    Exported { repository: String, image: ImageId },
    Detached,
}

impl Event {
    pub fn transition(verb: Verb, container: &ContainerName, outcome: Outcome) -> Self {
        Self::Transition {
            verb,
            container: container.clone(),
            outcome,
        }
    }

    pub fn stream(&self) -> Stream {
        match self {
            Self::Output { .. } | Self::AbortingOnExit => Stream::Stdout,
            Self::Exited { stream, .. } => *stream,
            Self::Transition { .. }
            | Self::UpToDate { .. }
            | Self::Exporting
            | Self::Exported { .. }
            | Self::Detached => Stream::Stderr,
        }
    }

    /// The rendered line with the outcome coloured for a terminal.
    pub fn styled(&self) -> String {
        match self {
            Self::Transition {
                verb,
                container,
                outcome,
            } => {
                let word = match outcome {
                    Outcome::Done => style(outcome.to_string()).green(),
                    Outcome::Error => style(outcome.to_string()).red(),
                };
                format!("{} {container} ... {}", verb.as_str(), word.for_stderr())
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition {
                verb,
                container,
                outcome,
            } => write!(f, "{} {container} ... {outcome}", verb.as_str()),
            Self::UpToDate { container } => write!(f, "{container} is up-to-date"),
            Self::Output { source, line } => write!(f, "{source} | {line}"),
            Self::Exited { container, code, .. } => {
                write!(f, "{container} exited with code {code}")
            }
            Self::AbortingOnExit => f.write_str("Aborting on container exit..."),
            Self::Exporting => f.write_str("Exporting built containers as images..."),
            Self::Exported { repository, image } => {
                write!(f, "Exported {repository} with image ID {image}")
            }
            Self::Detached => f.write_str("Deploying application in detached mode"),
        }
    }
}

/// Short form of a container name used to prefix its output: `web_1` for `ansible_web_1`.
pub fn output_source(container: &ContainerName, namespace: &str) -> String {
    container
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(container.as_str())
        .to_owned()
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Prints events to the terminal, each on its own stream.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: Event) {
        match event.stream() {
            Stream::Stdout => println!("{}", event.styled()),
            Stream::Stderr => eprintln!("{}", event.styled()),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }

    pub fn lines_on(&self, stream: Stream) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.stream() == stream)
            .map(ToString::to_string)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
