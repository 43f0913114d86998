use crate::CoreError;
use dockhand_schema::{ContainerName, Project, ServiceName};

/// The services a lifecycle action applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Services(Vec<ServiceName>),
}

impl Scope {
    /// No names means every service.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.is_empty() {
            Self::All
        } else {
            Self::Services(names.iter().map(|n| ServiceName::new(n.as_ref())).collect())
        }
    }

    /// Service indices in declaration order. Unknown names are an error.
    pub fn resolve(&self, project: &Project) -> Result<Vec<usize>, CoreError> {
        match self {
            Self::All => Ok((0..project.services.len()).collect()),
            Self::Services(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let index = project
                        .services
                        .iter()
                        .position(|s| s.name == *name)
                        .ok_or_else(|| CoreError::UnknownService(name.to_string()))?;
                    selected.push(index);
                }
                selected.sort_unstable();
                selected.dedup();
                Ok(selected)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies first, declaration order within a phase.
    Forward,
    /// Dependents first, reverse declaration order within a phase.
    Reverse,
}

/// Split the selected services into phases that may each run concurrently.
pub fn phases(project: &Project, selected: &[usize], direction: Direction) -> Vec<Vec<usize>> {
    let mut phases: Vec<Vec<usize>> = project
        .start_levels()
        .iter()
        .map(|level| {
            level
                .iter()
                .copied()
                .filter(|i| selected.contains(i))
                .collect::<Vec<_>>()
        })
        .filter(|level| !level.is_empty())
        .collect();
    if direction == Direction::Reverse {
        phases.reverse();
        for phase in &mut phases {
            phase.reverse();
        }
    }
    phases
}

/// Concrete container identities for the services in a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstance {
    pub entries: Vec<(usize, ServiceName, ContainerName)>,
    pub detached: bool,
}

impl RunInstance {
    pub fn new(project: &Project, scope: &Scope, detached: bool) -> Result<Self, CoreError> {
        let entries = scope
            .resolve(project)?
            .into_iter()
            .map(|i| {
                let name = project.services[i].name.clone();
                let container = project.container_name(&name, 1);
                (i, name, container)
            })
            .collect();
        Ok(Self { entries, detached })
    }

    pub fn indices(&self) -> Vec<usize> {
        self.entries.iter().map(|(i, _, _)| *i).collect()
    }

    pub fn container(&self, index: usize) -> Option<&ContainerName> {
        self.entries
            .iter()
            .find(|(i, _, _)| *i == index)
            .map(|(_, _, c)| c)
    }

    pub fn service(&self, index: usize) -> Option<&ServiceName> {
        self.entries
            .iter()
            .find(|(i, _, _)| *i == index)
            .map(|(_, s, _)| s)
    }
}
