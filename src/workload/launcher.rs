use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{RuntimeSettings, Settings};
use crate::core::ignite::VmManager;
use crate::core::locator::VmLocator;
use crate::core::vm::VmDescriptor;
use crate::errors::{CntrError, CntrResult};
use crate::remote::command::{CommandLine, Flags};
use crate::remote::ssh::check_credential;
use crate::remote::{CommandOutput, RemoteExecutor, RemoteTarget};
use crate::utils::{generate_name, os};
use crate::workload::env::MountSpec;

const MOUNT_OPTIONS: &str = "rbind:ro";

/// One `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub target_vm: String,
    pub app_image: String,
    pub instance_name: String,
    pub command: Option<String>,
    /// Only used when `command` is set and non-empty.
    pub command_args: Vec<String>,
    pub env: Vec<String>,
    pub host_network: bool,
    pub mount: Option<MountSpec>,
}

impl WorkloadSpec {
    /// A bare workload with a freshly generated instance name.
    pub fn new(target_vm: &str, app_image: &str, instance_prefix: &str) -> Self {
        Self {
            target_vm: target_vm.to_string(),
            app_image: app_image.to_string(),
            instance_name: generate_name(instance_prefix),
            command: None,
            command_args: Vec::new(),
            env: Vec::new(),
            host_network: false,
            mount: None,
        }
    }

    fn effective_command(&self) -> Option<&str> {
        self.command.as_deref().filter(|cmd| !cmd.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub vm: String,
    pub address: IpAddr,
    pub instance_name: String,
    pub create_output: CommandOutput,
    pub start_exit_status: u32,
}

/// `<ctr> -n <ns> container create <image> <instance> [<cmd> [<args>...]] [flags...]`
///
/// The runtime only takes the command and its arguments positionally, right
/// after the instance name.
pub fn create_command(
    runtime: &RuntimeSettings,
    spec: &WorkloadSpec,
    staged_mount: Option<&str>,
) -> CommandLine<Flags> {
    let mut line = CommandLine::new(runtime.ctr_path.as_str())
        .args(["-n", runtime.namespace.as_str(), "container", "create"])
        .arg(spec.app_image.as_str())
        .arg(spec.instance_name.as_str());

    if let Some(cmd) = spec.effective_command() {
        line = line.arg(cmd).args(spec.command_args.iter().cloned());
    }

    let mut line = line.flags();
    for var in &spec.env {
        line = line.option("--env", var.as_str());
    }
    if spec.host_network {
        line = line.switch("--net-host");
    }
    if let (Some(mount), Some(staged)) = (&spec.mount, staged_mount) {
        let value = format!(
            "type=bind,src={},dst={},options={}",
            staged, mount.destination, MOUNT_OPTIONS
        );
        line = line.assign("--mount", &value);
    }
    line
}

pub fn start_command(runtime: &RuntimeSettings, instance_name: &str) -> CommandLine<Flags> {
    CommandLine::new(runtime.ctr_path.as_str())
        .args(["-n", runtime.namespace.as_str(), "task", "start", "-d"])
        .arg(instance_name)
        .flags()
}

pub struct WorkloadLauncher {
    locator: VmLocator,
    vms: Arc<dyn VmManager>,
    remote: Arc<dyn RemoteExecutor>,
    runtime: RuntimeSettings,
    user: String,
    port: u16,
    staging_dir: String,
    is_privileged: fn() -> bool,
}

impl WorkloadLauncher {
    pub fn new(vms: Arc<dyn VmManager>, remote: Arc<dyn RemoteExecutor>, settings: &Settings) -> Self {
        Self {
            locator: VmLocator::new(vms.clone()),
            vms,
            remote,
            runtime: settings.runtime.clone(),
            user: settings.remote.user.clone(),
            port: settings.remote.port,
            staging_dir: settings.ignite.staging_dir.clone(),
            is_privileged: os::running_as_root,
        }
    }

    /// Replace the effective-uid check.
    pub fn with_privilege_check(mut self, check: fn() -> bool) -> Self {
        self.is_privileged = check;
        self
    }

    pub async fn launch(&self, spec: &WorkloadSpec) -> CntrResult<LaunchReport> {
        if !(self.is_privileged)() {
            return Err(CntrError::PermissionDenied);
        }
        if let Some(mount) = &spec.mount {
            mount.validate()?;
        }

        let vm = self.locator.resolve(&spec.target_vm).await?;
        check_credential(&vm.credential_path).await?;
        let target = self.target_for(&vm)?;

        let staged = match &spec.mount {
            Some(mount) => Some(self.stage_mount(&vm, &target, mount).await?),
            None => None,
        };

        let create = create_command(&self.runtime, spec, staged.as_deref()).render();
        debug!(vm = %vm.name, command = %create, "creating container");
        let create_output = self
            .remote
            .run_command(&target, &create)
            .await
            .map_err(|e| CntrError::RemoteCreateFailed {
                instance: spec.instance_name.clone(),
                source: Box::new(e),
            })?;
        info!("✓ Created container {} on {}", spec.instance_name, vm.name);

        let start_exit_status = self.start(&target, &spec.instance_name).await?;
        info!("✓ Started container {} on {}", spec.instance_name, vm.name);

        Ok(LaunchReport {
            vm: vm.name.clone(),
            address: target.address,
            instance_name: spec.instance_name.clone(),
            create_output,
            start_exit_status,
        })
    }

    fn target_for(&self, vm: &VmDescriptor) -> CntrResult<RemoteTarget> {
        let address = vm.address().ok_or_else(|| CntrError::NoUsableAddress {
            vm: vm.name.clone(),
        })?;
        Ok(RemoteTarget {
            address,
            port: self.port,
            user: self.user.clone(),
            credential_path: vm.credential_path.clone(),
        })
    }

    async fn stage_mount(
        &self,
        vm: &VmDescriptor,
        target: &RemoteTarget,
        mount: &MountSpec,
    ) -> CntrResult<String> {
        let mkdir = CommandLine::new("mkdir")
            .args(["-p", self.staging_dir.as_str()])
            .flags()
            .render();
        self.remote
            .run_command(target, &mkdir)
            .await
            .map_err(|e| CntrError::MountPrepFailed(e.to_string()))?;

        let staged = self
            .vms
            .copy_to_vm(&vm.uid, &mount.source, &self.staging_dir)
            .await
            .map_err(|e| CntrError::MountPrepFailed(e.to_string()))?;
        info!("Staged {} at {}", mount.source.display(), staged);
        Ok(staged)
    }

    async fn start(&self, target: &RemoteTarget, instance: &str) -> CntrResult<u32> {
        let partial = |source: CntrError| {
            warn!("Container {} was created but not started", instance);
            CntrError::RemoteStartFailed {
                instance: instance.to_string(),
                source: Box::new(source),
            }
        };

        let command = start_command(&self.runtime, instance).render();
        let detached = self
            .remote
            .start_command(target, &command)
            .await
            .map_err(partial)?;

        match detached.wait().await {
            Ok(0) => Ok(0),
            Ok(exit_status) => Err(partial(CntrError::RemoteCommandFailed {
                exit_status,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })),
            Err(e) => Err(partial(e)),
        }
    }
}
