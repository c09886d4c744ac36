use super::{ConfigError, ConfigLayer, PackagesConfig};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE_NAME: &str = ".spack-helpers.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// `spack.yaml`: everything lives under a top-level `spack:` key.
    Environment,
    /// A bare configuration scope file such as `packages.yaml`.
    Scope,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Copy the previous file to `<name>.bkp` before replacing it.
    pub backup: bool,
}

/// A YAML configuration file whose `packages:` section can be rewritten
/// without disturbing any other key.
#[derive(Debug, Clone)]
pub struct EnvManifest {
    path: PathBuf,
    kind: ManifestKind,
    document: Mapping,
    packages_key: String,
    packages: PackagesConfig,
    changed: bool,
}

impl EnvManifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::ManifestMissing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str_at(path, &raw)
    }

    /// Parses `raw` as if it had been read from `path`.
    pub fn from_str_at(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::ParseManifest {
            path: path.to_path_buf(),
            message,
        };
        let value: Value = serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string()))?;
        let document = match value {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m,
            _ => return Err(parse_err("top-level YAML value must be a mapping".to_string())),
        };

        let kind = if document.contains_key("spack") {
            ManifestKind::Environment
        } else {
            ManifestKind::Scope
        };
        let mut manifest = Self {
            path: path.to_path_buf(),
            kind,
            document,
            packages_key: "packages".to_string(),
            packages: PackagesConfig::default(),
            changed: false,
        };

        let section = manifest.section();
        let found = ["packages", "packages:"]
            .into_iter()
            .find(|k| section.is_some_and(|s| s.contains_key(*k)));
        if let Some(key) = found {
            let value = section
                .and_then(|s| s.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            manifest.packages = PackagesConfig::from_value(&value).map_err(parse_err)?;
            manifest.packages_key = key.to_string();
        }
        debug!(path = %path.display(), ?kind, "loaded configuration file");
        Ok(manifest)
    }

    fn section(&self) -> Option<&Mapping> {
        match self.kind {
            ManifestKind::Scope => Some(&self.document),
            ManifestKind::Environment => self.document.get("spack").and_then(Value::as_mapping),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn packages(&self) -> &PackagesConfig {
        &self.packages
    }

    /// Marks the manifest dirty; [`EnvManifest::save`] writes unconditionally.
    pub fn packages_mut(&mut self) -> &mut PackagesConfig {
        self.changed = true;
        &mut self.packages
    }

    /// Whether `packages` was handed out mutably since the last load or save.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// The root specs listed under `spack: specs:`; matrix entries are skipped.
    pub fn user_specs(&self) -> Vec<String> {
        self.section()
            .and_then(|s| s.get("specs"))
            .and_then(Value::as_sequence)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            name: self.path.display().to_string(),
            packages: self.packages.clone(),
        }
    }

    fn render(&self) -> Result<String, ConfigError> {
        let mut document = self.document.clone();
        match self.kind {
            ManifestKind::Scope => self.put_packages(&mut document),
            ManifestKind::Environment => {
                if !document.get("spack").is_some_and(Value::is_mapping) {
                    document.insert(
                        Value::String("spack".to_string()),
                        Value::Mapping(Mapping::new()),
                    );
                }
                if let Some(Value::Mapping(spack)) = document.get_mut("spack") {
                    self.put_packages(spack);
                }
            }
        }
        serde_yaml::to_string(&Value::Mapping(document)).map_err(|e| {
            ConfigError::SerializeManifest {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })
    }

    fn put_packages(&self, section: &mut Mapping) {
        let key = Value::String(self.packages_key.clone());
        if section.contains_key(&key) || !self.packages.is_empty() {
            section.insert(key, self.packages.to_value());
        }
    }

    /// Writes the manifest back atomically while holding an exclusive lock
    /// on the directory's lock file.
    pub fn save(&mut self, options: SaveOptions) -> Result<(), ConfigError> {
        let rendered = self.render()?;
        let _lock = ManifestLock::acquire(&self.path)?;
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ConfigError::WriteFile { path, source }
        };

        if options.backup && self.path.is_file() {
            let backup = backup_path(&self.path);
            fs::copy(&self.path, &backup).map_err(write_err(&backup))?;
            debug!(backup = %backup.display(), "wrote backup");
        }

        let tmp = self
            .path
            .with_extension(format!("yaml.tmp.{}", std::process::id()));
        fs::write(&tmp, rendered.as_bytes()).map_err(write_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            ConfigError::WriteFile {
                path: self.path.clone(),
                source,
            }
        })?;
        self.changed = false;
        debug!(path = %self.path.display(), "wrote configuration file");
        Ok(())
    }
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bkp");
    path.with_file_name(name)
}

struct ManifestLock {
    file: fs::File,
}

impl ManifestLock {
    fn acquire(manifest: &Path) -> Result<Self, ConfigError> {
        let lock_path = manifest
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(LOCK_FILE_NAME);
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| ConfigError::WriteFile {
                path: lock_path.clone(),
                source,
            })?;
        fs4::fs_std::FileExt::try_lock_exclusive(&file).map_err(|e| ConfigError::Locked {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;
        Ok(Self { file })
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = fs4::fs_std::FileExt::unlock(&self.file);
    }
}
