use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::IgniteSettings;
use crate::core::vm::{VmObject, VmRecord};
use crate::errors::{CntrError, CntrResult};

const VM_KIND_DIR: &str = "vm";
const METADATA_FILE: &str = "metadata.json";

/// Query and control surface of the external VM manager.
#[async_trait]
pub trait VmManager: Send + Sync {
    /// Look a VM up by exact name or UID prefix.
    async fn find(&self, identifier: &str) -> CntrResult<Option<VmRecord>>;

    /// Copy a local file into `remote_dir` inside the VM and return its path there.
    async fn copy_to_vm(&self, vm: &str, local: &Path, remote_dir: &str) -> CntrResult<String>;

    async fn stop(&self, vm: &str) -> CntrResult<()>;

    async fn remove(&self, vm: &str, force: bool) -> CntrResult<()>;
}

/// Reads ignite's object store directly and shells out to the `ignite` binary
/// for anything that changes VM state.
#[derive(Debug, Clone)]
pub struct IgniteManager {
    data_dir: PathBuf,
    binary: String,
}

impl IgniteManager {
    pub fn new(settings: &IgniteSettings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            binary: settings.binary.clone(),
        }
    }

    fn vm_dir(&self) -> PathBuf {
        self.data_dir.join(VM_KIND_DIR)
    }

    async fn list(&self) -> CntrResult<Vec<VmRecord>> {
        let mut entries = match tokio::fs::read_dir(self.vm_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.vm_dir().display(), "no ignite VM directory");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CntrError::VmManager(format!(
                "cannot read {}: {}",
                self.vm_dir().display(),
                e
            ))),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let object_path = entry.path();
            let metadata = object_path.join(METADATA_FILE);
            let raw = match tokio::fs::read(&metadata).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Skipping unreadable VM object {}: {}", metadata.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<VmObject>(&raw) {
                Ok(obj) => records.push(obj.into_record(object_path)),
                Err(e) => warn!("Skipping malformed VM object {}: {}", metadata.display(), e),
            }
        }

        Ok(records)
    }

    async fn ignite(&self, args: &[&str]) -> CntrResult<String> {
        debug!(binary = %self.binary, ?args, "running ignite");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| CntrError::VmManager(format!("failed to spawn {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CntrError::VmManager(format!(
                "{} {} exited {}: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Pick the VM an identifier refers to: an exact name wins, otherwise the UID
/// prefix must be unambiguous.
pub fn select_vm(identifier: &str, records: Vec<VmRecord>) -> CntrResult<Option<VmRecord>> {
    if identifier.is_empty() {
        return Ok(None);
    }

    let mut by_uid = Vec::new();
    for record in records {
        if record.name == identifier || record.uid == identifier {
            return Ok(Some(record));
        }
        if record.uid.starts_with(identifier) {
            by_uid.push(record);
        }
    }

    match by_uid.len() {
        0 => Ok(None),
        1 => Ok(by_uid.pop()),
        _ => Err(CntrError::AmbiguousVm {
            vm: identifier.to_string(),
            matches: by_uid.into_iter().map(|r| r.uid).collect(),
        }),
    }
}

#[async_trait]
impl VmManager for IgniteManager {
    async fn find(&self, identifier: &str) -> CntrResult<Option<VmRecord>> {
        select_vm(identifier, self.list().await?)
    }

    async fn copy_to_vm(&self, vm: &str, local: &Path, remote_dir: &str) -> CntrResult<String> {
        let file_name = local
            .file_name()
            .ok_or_else(|| {
                CntrError::VmManager(format!("{} does not name a file", local.display()))
            })?
            .to_string_lossy()
            .into_owned();

        let staged = staged_path(remote_dir, &file_name);
        let source = local.to_string_lossy();
        let target = format!("{}:{}", vm, staged);

        info!("📦 Copying {} to {}", source, target);
        self.ignite(&["cp", &source, &target]).await?;
        Ok(staged)
    }

    async fn stop(&self, vm: &str) -> CntrResult<()> {
        info!("Stopping VM {}", vm);
        self.ignite(&["stop", vm]).await.map(|_| ())
    }

    async fn remove(&self, vm: &str, force: bool) -> CntrResult<()> {
        info!("Removing VM {}", vm);
        if force {
            self.ignite(&["rm", "-f", vm]).await.map(|_| ())
        } else {
            self.ignite(&["rm", vm]).await.map(|_| ())
        }
    }
}

pub fn staged_path(remote_dir: &str, file_name: &str) -> String {
    format!("{}/{}", remote_dir.trim_end_matches('/'), file_name)
}
