use crate::manifest::{Manifest, ManifestSet};
use crate::ShipitError;
use dockhand_schema::ServiceName;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Accepts rendered documents on behalf of a live cluster.
pub trait ClusterClient: Send + Sync {
    /// Create the resource. Returns the platform's acknowledgement.
    fn apply(&self, manifest: &Manifest) -> Result<String, ShipitError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Accepted(String),
    Rejected(String),
    /// Not sent because an earlier document of the same service failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub name: String,
    pub service: ServiceName,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub outcomes: Vec<SubmissionOutcome>,
}

impl SubmissionReport {
    pub fn failed(&self) -> Vec<&SubmissionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, SubmissionStatus::Accepted(_)))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    pub fn into_result(self) -> Result<Self, ShipitError> {
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                SubmissionStatus::Accepted(_) => None,
                SubmissionStatus::Rejected(reason) => Some(format!("{} ({reason})", o.name)),
                SubmissionStatus::Skipped => Some(format!("{} (skipped)", o.name)),
            })
            .collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(ShipitError::Submission { failed })
        }
    }
}

/// Submit every document in dependency order.
///
/// A rejected workload keeps the networking objects that select it from being
/// sent; other services are unaffected.
pub fn submit(set: &ManifestSet, client: &dyn ClusterClient) -> SubmissionReport {
    let mut broken: BTreeSet<&str> = BTreeSet::new();
    let mut report = SubmissionReport::default();
    for manifest in set.submission_order() {
        let status = if broken.contains(manifest.service.as_str()) {
            debug!("skipping {}", manifest.name);
            SubmissionStatus::Skipped
        } else {
            match client.apply(manifest) {
                Ok(ack) => SubmissionStatus::Accepted(ack),
                Err(e) => {
                    warn!("{} was not accepted: {e}", manifest.name);
                    broken.insert(manifest.service.as_str());
                    SubmissionStatus::Rejected(e.to_string())
                }
            }
        };
        report.outcomes.push(SubmissionOutcome {
            name: manifest.name.clone(),
            service: manifest.service.clone(),
            status,
        });
    }
    report
}
