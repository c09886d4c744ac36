use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no active Spack environment (fix: pass --env <dir> or activate one so that SPACK_ENV is set)"
    )]
    NoActiveEnvironment,
    #[error("environment manifest not found: {0} (expected spack.yaml in the environment directory)")]
    ManifestMissing(PathBuf),
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse YAML configuration: {path}: {message}")]
    ParseManifest { path: PathBuf, message: String },
    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize configuration for {path}: {message}")]
    SerializeManifest { path: PathBuf, message: String },
    #[error("another operation holds the lock on {path} ({message})")]
    Locked { path: PathBuf, message: String },
    #[error("failed to read policy TOML: {path}: {source}")]
    ReadPolicy {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse policy TOML: {path}: {message}")]
    ParsePolicy { path: PathBuf, message: String },
    #[error("could not read package list from {path}: {source}")]
    ReadPackageList {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no packages specified (provide package names or use --pkgs-from-file)")]
    NoPackagesSpecified,
    #[error("no compiler specs specified")]
    NoCompilersSpecified,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::NoActiveEnvironment => "config.no_active_environment",
            ConfigError::ManifestMissing(_) => "config.manifest_missing",
            ConfigError::ReadFile { .. } => "config.read_failed",
            ConfigError::ParseManifest { .. } => "config.parse_failed",
            ConfigError::WriteFile { .. } => "config.write_failed",
            ConfigError::SerializeManifest { .. } => "config.serialize_failed",
            ConfigError::Locked { .. } => "config.locked",
            ConfigError::ReadPolicy { .. } => "config.policy_read_failed",
            ConfigError::ParsePolicy { .. } => "config.policy_parse_failed",
            ConfigError::ReadPackageList { .. } => "config.package_list_read_failed",
            ConfigError::NoPackagesSpecified => "config.no_packages",
            ConfigError::NoCompilersSpecified => "config.no_compilers",
        }
    }
}
