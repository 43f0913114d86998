use crate::manifest::ManifestSet;
use crate::ShipitError;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SHIPIT_CONFIG_DIR: &str = "shipit_config";
pub const ARTIFACT_FILE_NAME: &str = "deployment_artifacts.yml";

/// `{provisioning_root}/shipit_config/{platform}/deployment_artifacts.yml`
pub fn artifact_path(provisioning_root: &Path, platform: &str) -> PathBuf {
    provisioning_root
        .join(SHIPIT_CONFIG_DIR)
        .join(platform)
        .join(ARTIFACT_FILE_NAME)
}

/// Write the whole set as one YAML mapping. An existing artifact is replaced.
pub fn save_manifests(set: &ManifestSet, provisioning_root: &Path) -> Result<PathBuf, ShipitError> {
    let path = artifact_path(provisioning_root, &set.platform);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = set.to_yaml()?;
    let tmp = path.with_extension("yml.tmp");
    std::fs::write(&tmp, yaml)?;
    std::fs::rename(&tmp, &path)?;
    info!("saved {} documents to {}", set.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResourceKind;
    use dockhand_schema::ServiceName;
    use serde_json::json;

    #[test]
    fn path_layout() {
        let path = artifact_path(Path::new("/work/ansible"), "openshift");
        assert_eq!(
            path,
            PathBuf::from("/work/ansible/shipit_config/openshift/deployment_artifacts.yml")
        );
    }

    #[test]
    fn save_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let web = ServiceName::new("web");

        let mut first = ManifestSet::new("kubernetes");
        first.push("web-deployment".to_owned(), ResourceKind::Workload, &web, json!({"kind": "Deployment"}));
        first.push("web-service".to_owned(), ResourceKind::Networking, &web, json!({"kind": "Service"}));
        save_manifests(&first, dir.path()).unwrap();

        let mut second = ManifestSet::new("kubernetes");
        second.push("web-deployment".to_owned(), ResourceKind::Workload, &web, json!({"kind": "Deployment"}));
        let path = save_manifests(&second, dir.path()).unwrap();

        let saved: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.as_mapping().unwrap().len(), 1);
        assert!(!path.with_extension("yml.tmp").exists());
    }
}
