use std::path::{Path, PathBuf};

use crate::errors::{CntrError, CntrResult};

/// `-e` values first, then every env file in order. Duplicate keys are kept;
/// the runtime in the VM applies the last one.
pub fn combined_env<P: AsRef<Path>>(flag_envs: &[String], env_files: &[P]) -> CntrResult<Vec<String>> {
    let mut env = flag_envs.to_vec();
    for file in env_files {
        env.extend(read_env_file(file.as_ref())?);
    }
    Ok(env)
}

/// Parse a `KEY=VALUE` file without touching this process's environment.
pub fn read_env_file(path: &Path) -> CntrResult<Vec<String>> {
    let invalid = |message: String| CntrError::InvalidEnvFile {
        path: path.to_path_buf(),
        message,
    };

    let entries = dotenvy::from_path_iter(path).map_err(|e| invalid(e.to_string()))?;
    entries
        .map(|entry| {
            entry
                .map(|(key, value)| format!("{}={}", key, value))
                .map_err(|e| invalid(e.to_string()))
        })
        .collect()
}

/// A local file to expose read-only inside the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub destination: String,
}

impl MountSpec {
    /// Pair up `--mount-src` and `--mount-dest`. A destination on its own is ignored.
    pub fn from_flags(source: Option<&str>, destination: Option<&str>) -> CntrResult<Option<Self>> {
        match (source, destination) {
            (Some(source), Some(destination)) => {
                let mount = Self {
                    source: PathBuf::from(source),
                    destination: destination.to_string(),
                };
                mount.validate()?;
                Ok(Some(mount))
            }
            (Some(source), None) => Err(CntrError::MissingMountDestination {
                source_path: source.to_string(),
            }),
            (None, _) => Ok(None),
        }
    }

    /// Both paths end up inside one comma-separated `--mount` value, so neither
    /// may contain a comma. The destination must be absolute.
    pub fn validate(&self) -> CntrResult<()> {
        let invalid = |path: &str, reason: &str| CntrError::InvalidMountPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if !self.destination.starts_with('/') {
            return Err(invalid(&self.destination, "destination must be an absolute path"));
        }
        if self.destination.contains(',') {
            return Err(invalid(&self.destination, "destination cannot contain ','"));
        }
        match self.source.file_name() {
            None => Err(invalid(&self.source.to_string_lossy(), "source must name a file")),
            Some(name) if name.to_string_lossy().contains(',') => {
                Err(invalid(&self.source.to_string_lossy(), "file name cannot contain ','"))
            }
            Some(_) => Ok(()),
        }
    }
}
