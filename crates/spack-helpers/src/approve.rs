use crate::config::{ConfigError, EnvManifest, PackagesConfig, SaveOptions};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApproveOutcome {
    /// Approved names now carrying `buildable: true`.
    pub enabled: Vec<String>,
    /// Approved names left alone because they were already `buildable: false`.
    pub kept_unbuildable: Vec<String>,
}

/// Marks every approved package buildable and everything else (`all`) not.
pub fn restrict_to_approved(packages: &mut PackagesConfig, approved: &[String]) -> ApproveOutcome {
    let mut outcome = ApproveOutcome::default();
    for name in approved {
        let already_unbuildable = packages.update_settings(name, |s| {
            if s.buildable == Some(false) {
                return true;
            }
            s.buildable = Some(true);
            false
        });
        if already_unbuildable {
            info!(package = %name, "package is already buildable:false, skipping");
            outcome.kept_unbuildable.push(name.clone());
        } else {
            debug!(package = %name, "set buildable:true");
            outcome.enabled.push(name.clone());
        }
    }
    packages.update_settings("all", |s| s.buildable = Some(false));
    outcome
}

pub fn allow_only_approved_packages(
    manifest: &mut EnvManifest,
    approved: &[String],
    concretized: bool,
    save: SaveOptions,
) -> Result<ApproveOutcome, ConfigError> {
    if approved.is_empty() {
        return Err(ConfigError::NoPackagesSpecified);
    }
    let outcome = restrict_to_approved(manifest.packages_mut(), approved);
    manifest.save(save)?;

    info!(count = approved.len(), "configured approved package(s) as buildable");
    info!("set 'all' packages as non-buildable (buildable:false)");
    if concretized {
        warn!(
            "environment has concretized specs; run 'spack concretize -f' to re-concretize with the new buildability settings"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    #[test]
    fn approved_names_become_buildable_except_explicit_false() {
        let value: Value =
            serde_yaml::from_str("zlib: {buildable: false}\ncmake: {version: ['3.27']}\n").expect("yaml");
        let mut packages = PackagesConfig::from_value(&value).expect("packages");
        let outcome = restrict_to_approved(
            &mut packages,
            &["zlib".to_string(), "cmake".to_string(), "hdf5".to_string()],
        );

        assert_eq!(outcome.kept_unbuildable, vec!["zlib"]);
        assert_eq!(outcome.enabled, vec!["cmake", "hdf5"]);
        assert_eq!(packages.settings("zlib").and_then(|s| s.buildable), Some(false));
        let cmake = packages.settings("cmake").expect("cmake");
        assert_eq!(cmake.buildable, Some(true));
        assert!(cmake.extra.contains_key("version"));
        assert_eq!(packages.settings("all").and_then(|s| s.buildable), Some(false));
    }

    #[test]
    fn empty_list_is_rejected_before_writing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.yaml");
        std::fs::write(&path, "spack:\n  specs: [zlib]\n").expect("write manifest");
        let mut manifest = EnvManifest::load(&path).expect("load");
        let err = allow_only_approved_packages(&mut manifest, &[], false, SaveOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "config.no_packages");
        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("buildable"));
    }
}
