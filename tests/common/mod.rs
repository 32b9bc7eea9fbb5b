#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ignite_cntr::config::ComposeSettings;
use ignite_cntr::core::docker_manager::{
    ContainerEngine, ContainerSpec, EngineError, ExecSpec, ExecState,
};
use ignite_cntr::core::ignite::{select_vm, staged_path, VmManager};
use ignite_cntr::core::vm::{VmRecord, SSH_KEY_PREFIX};
use ignite_cntr::errors::{CntrError, CntrResult};
use ignite_cntr::remote::{CommandOutput, DetachedCommand, RemoteExecutor, RemoteTarget};

pub fn fast_compose() -> ComposeSettings {
    ComposeSettings {
        poll_interval_ms: 1,
        runtime_ready_timeout_secs: 5,
        pull_timeout_secs: 5,
        ..ComposeSettings::default()
    }
}

/// In-memory engine: images are a tag -> id map, execs finish immediately
/// unless listed in `stuck_execs`.
///
/// Execs are matched on the last word of their command: `version` for the
/// readiness check, the namespace name for `namespace create`, the image
/// reference for a pull.
#[derive(Default)]
pub struct FakeEngine {
    pub tags: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    /// Exit 1.
    pub failing_execs: Vec<String>,
    /// Never stop running.
    pub stuck_execs: Vec<String>,
    pub fail_commit: bool,
    pub fail_remove: bool,
    pub fail_build: bool,
    pub down: bool,
    pub execs: Mutex<HashMap<String, Vec<String>>>,
    pub containers: Mutex<HashMap<String, String>>,
    pub next_id: AtomicUsize,
}

impl FakeEngine {
    pub fn with_images(images: &[&str]) -> Self {
        let engine = Self::default();
        for image in images {
            let id = engine.fresh_id("sha256:");
            engine.tags.lock().unwrap().insert(normalize(image), id);
        }
        engine
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn image_id(&self, reference: &str) -> Option<String> {
        self.tags.lock().unwrap().get(&normalize(reference)).cloned()
    }

    /// Image references pulled with ctr, in call order.
    pub fn pulls(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("exec /usr/bin/ctr --namespace=ignite image pull "))
            .map(str::to_string)
            .collect()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{}{:04}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn normalize(reference: &str) -> String {
    let (repo, tag) = ignite_cntr::utils::split_image_ref(reference);
    format!("{}:{}", repo, tag)
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        if self.down {
            return Err(EngineError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn build_image(&self, context: Vec<u8>, tag: &str) -> Result<Vec<String>, EngineError> {
        self.record(format!("build {}", tag));
        if self.fail_build || context.is_empty() {
            return Err(EngineError::Request(
                "The command '/bin/sh -c apt-get update -y' returned a non-zero code: 100".into(),
            ));
        }
        let id = self.fresh_id("sha256:");
        self.tags.lock().unwrap().insert(normalize(tag), id);
        Ok(vec!["Step 1/2".into(), "Step 2/2".into()])
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(format!("create {} from {}", spec.name, spec.image));
        if self.image_id(&spec.image).is_none() {
            return Err(EngineError::Request(format!("No such image: {}", spec.image)));
        }
        let id = self.fresh_id("ctr-");
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), spec.image.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {}", id));
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.record(format!("remove {} force={}", id, force));
        self.removed.lock().unwrap().push(id.to_string());
        if self.fail_remove {
            return Err(EngineError::Request("device or resource busy".into()));
        }
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn create_exec(&self, _container_id: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let id = self.fresh_id("exec-");
        self.execs.lock().unwrap().insert(id.clone(), spec.cmd.clone());
        Ok(id)
    }

    async fn start_exec(&self, exec_id: &str, _detach: bool) -> Result<(), EngineError> {
        let cmd = self.execs.lock().unwrap().get(exec_id).cloned().unwrap_or_default();
        self.record(format!("exec {}", cmd.join(" ")));
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecState, EngineError> {
        let cmd = self.execs.lock().unwrap().get(exec_id).cloned().unwrap_or_default();
        let last = cmd.last().cloned().unwrap_or_default();
        if self.stuck_execs.contains(&last) {
            return Ok(ExecState {
                running: true,
                exit_code: None,
            });
        }
        let failed = self.failing_execs.contains(&last);
        Ok(ExecState {
            running: false,
            exit_code: Some(if failed { 1 } else { 0 }),
        })
    }

    async fn commit_container(&self, id: &str, repository: &str, tag: &str) -> Result<String, EngineError> {
        self.record(format!("commit {} {}:{}", id, repository, tag));
        if self.fail_commit {
            return Err(EngineError::Request("no space left on device".into()));
        }
        let digest = self.fresh_id("sha256:");
        self.tags
            .lock()
            .unwrap()
            .insert(format!("{}:{}", repository, tag), digest.clone());
        Ok(digest)
    }
}

/// VM manager over a fixed set of records.
#[derive(Default)]
pub struct FakeVmManager {
    pub records: Vec<VmRecord>,
    pub copies: Mutex<Vec<(String, PathBuf, String)>>,
    pub fail_copy: bool,
}

impl FakeVmManager {
    pub fn with(records: Vec<VmRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}

#[async_trait]
impl VmManager for FakeVmManager {
    async fn find(&self, identifier: &str) -> CntrResult<Option<VmRecord>> {
        select_vm(identifier, self.records.clone())
    }

    async fn copy_to_vm(&self, vm: &str, local: &Path, remote_dir: &str) -> CntrResult<String> {
        if self.fail_copy {
            return Err(CntrError::VmManager("ignite cp exited 1".into()));
        }
        self.copies
            .lock()
            .unwrap()
            .push((vm.to_string(), local.to_path_buf(), remote_dir.to_string()));
        let name = local.file_name().unwrap().to_string_lossy().into_owned();
        Ok(staged_path(remote_dir, &name))
    }

    async fn stop(&self, _vm: &str) -> CntrResult<()> {
        Ok(())
    }

    async fn remove(&self, _vm: &str, _force: bool) -> CntrResult<()> {
        Ok(())
    }
}

/// Records every command; exit statuses are configurable.
#[derive(Default)]
pub struct RecordingExecutor {
    pub commands: Mutex<Vec<(RemoteTarget, String)>>,
    pub create_exit: u32,
    pub start_exit: u32,
}

impl RecordingExecutor {
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run_command(&self, target: &RemoteTarget, command: &str) -> CntrResult<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string()));
        let exit_status = if command.contains(" container create ") {
            self.create_exit
        } else {
            0
        };
        if exit_status != 0 {
            return Err(CntrError::RemoteCommandFailed {
                exit_status,
                stdout: Vec::new(),
                stderr: b"image not found".to_vec(),
            });
        }
        Ok(CommandOutput {
            stdout: b"ok\n".to_vec(),
            ..CommandOutput::default()
        })
    }

    async fn start_command(&self, target: &RemoteTarget, command: &str) -> CntrResult<DetachedCommand> {
        self.commands
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string()));
        let exit_status = self.start_exit;
        Ok(DetachedCommand::spawn(async move { Ok(exit_status) }))
    }
}

/// A VM record whose object directory holds an SSH key file.
pub fn vm_record(root: &Path, uid: &str, name: &str, running: bool, ips: &[&str]) -> VmRecord {
    let object_path = root.join(uid);
    std::fs::create_dir_all(&object_path).unwrap();
    std::fs::write(object_path.join(format!("{}{}", SSH_KEY_PREFIX, uid)), b"key").unwrap();
    VmRecord {
        uid: uid.to_string(),
        name: name.to_string(),
        running,
        ip_addresses: ips.iter().map(|ip| ip.parse::<IpAddr>().unwrap()).collect(),
        object_path,
    }
}
