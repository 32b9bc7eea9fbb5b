mod common;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use common::{vm_record, FakeVmManager, RecordingExecutor};
use ignite_cntr::config::Settings;
use ignite_cntr::errors::{CntrError, ErrorCategory};
use ignite_cntr::workload::{MountSpec, WorkloadLauncher, WorkloadSpec};

struct Harness {
    _dir: tempfile::TempDir,
    vms: Arc<FakeVmManager>,
    remote: Arc<RecordingExecutor>,
}

impl Harness {
    fn new(running: bool, ips: &[&str], remote: RecordingExecutor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let record = vm_record(dir.path(), "4f3c2b1a9d8e7f60", "vm1", running, ips);
        Self {
            vms: Arc::new(FakeVmManager::with(vec![record])),
            remote: Arc::new(remote),
            _dir: dir,
        }
    }

    fn launcher(&self) -> WorkloadLauncher {
        WorkloadLauncher::new(self.vms.clone(), self.remote.clone(), &Settings::default())
            .with_privilege_check(|| true)
    }
}

fn spec() -> WorkloadSpec {
    WorkloadSpec::new("vm1", "app:latest", "container-app")
}

#[tokio::test]
async fn empty_command_with_env_and_host_network() {
    let harness = Harness::new(true, &["10.0.0.5"], RecordingExecutor::default());
    let spec = WorkloadSpec {
        command: Some(String::new()),
        command_args: vec!["--verbose".to_string()],
        env: vec!["A=1".to_string()],
        host_network: true,
        ..spec()
    };

    let report = harness.launcher().launch(&spec).await.unwrap();

    let commands = harness.remote.commands();
    assert_eq!(commands.len(), 2);
    let create = &commands[0];
    assert_eq!(
        *create,
        format!(
            "/usr/bin/ctr -n ignite container create app:latest {} --env A=1 --net-host",
            spec.instance_name
        )
    );
    assert!(create.ends_with("--env A=1 --net-host"));
    assert!(!create.contains("--verbose"));
    assert_eq!(
        commands[1],
        format!("/usr/bin/ctr -n ignite task start -d {}", spec.instance_name)
    );

    let target = &harness.remote.targets()[0];
    assert_eq!(target.address, "10.0.0.5".parse::<IpAddr>().unwrap());
    assert_eq!(target.user, "root");
    assert!(target.credential_path.ends_with("4f3c2b1a9d8e7f60/id_4f3c2b1a9d8e7f60"));

    assert_eq!(report.vm, "vm1");
    assert_eq!(report.instance_name, spec.instance_name);
    assert_eq!(report.start_exit_status, 0);
}

#[tokio::test]
async fn mount_is_staged_then_bound_read_only() {
    let harness = Harness::new(true, &["10.0.0.5"], RecordingExecutor::default());
    let spec = WorkloadSpec {
        mount: MountSpec::from_flags(Some("/local/data.db"), Some("/data/db")).unwrap(),
        ..spec()
    };

    harness.launcher().launch(&spec).await.unwrap();

    let copies = harness.vms.copies.lock().unwrap().clone();
    assert_eq!(
        copies,
        [(
            "4f3c2b1a9d8e7f60".to_string(),
            PathBuf::from("/local/data.db"),
            "/var/lib/ignite-cntr/mounts".to_string()
        )]
    );

    let commands = harness.remote.commands();
    assert_eq!(commands[0], "mkdir -p /var/lib/ignite-cntr/mounts");
    assert!(commands[1].ends_with(
        "--mount=type=bind,src=/var/lib/ignite-cntr/mounts/data.db,dst=/data/db,options=rbind:ro"
    ));
}

#[tokio::test]
async fn failed_copy_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vms = Arc::new(FakeVmManager {
        fail_copy: true,
        ..FakeVmManager::with(vec![vm_record(dir.path(), "abc123", "vm1", true, &["10.0.0.5"])])
    });
    let remote = Arc::new(RecordingExecutor::default());
    let launcher = WorkloadLauncher::new(vms, remote.clone(), &Settings::default())
        .with_privilege_check(|| true);

    let spec = WorkloadSpec {
        mount: MountSpec::from_flags(Some("/local/data.db"), Some("/data/db")).unwrap(),
        ..spec()
    };
    let err = launcher.launch(&spec).await.unwrap_err();

    assert!(matches!(err, CntrError::MountPrepFailed(_)));
    assert!(remote
        .commands()
        .iter()
        .all(|command| !command.contains("container create")));
}

#[tokio::test]
async fn running_vm_without_address_never_reaches_the_executor() {
    let harness = Harness::new(true, &[], RecordingExecutor::default());

    let err = harness.launcher().launch(&spec()).await.unwrap_err();

    assert!(matches!(err, CntrError::NoUsableAddress { .. }));
    assert!(harness.remote.commands().is_empty());
}

#[tokio::test]
async fn stopped_vm_is_not_contacted() {
    let harness = Harness::new(false, &["10.0.0.5"], RecordingExecutor::default());

    let err = harness.launcher().launch(&spec()).await.unwrap_err();

    assert!(matches!(err, CntrError::VmNotRunning { .. }));
    assert!(harness.remote.commands().is_empty());
}

#[tokio::test]
async fn unprivileged_caller_is_rejected_first() {
    let harness = Harness::new(true, &["10.0.0.5"], RecordingExecutor::default());
    let launcher = harness.launcher().with_privilege_check(|| false);

    let err = launcher.launch(&spec()).await.unwrap_err();

    assert!(matches!(err, CntrError::PermissionDenied));
    assert_eq!(err.category(), ErrorCategory::Precondition);
    assert!(harness.remote.commands().is_empty());
}

#[tokio::test]
async fn create_failure_skips_start() {
    let harness = Harness::new(
        true,
        &["10.0.0.5"],
        RecordingExecutor {
            create_exit: 1,
            ..RecordingExecutor::default()
        },
    );

    let err = harness.launcher().launch(&spec()).await.unwrap_err();

    assert!(matches!(err, CntrError::RemoteCreateFailed { .. }));
    assert_eq!(err.category(), ErrorCategory::RemoteExecution);
    let (_, stderr) = err.remote_output().unwrap();
    assert_eq!(stderr, b"image not found");
    assert_eq!(harness.remote.commands().len(), 1);
}

#[tokio::test]
async fn start_failure_leaves_created_instance_as_partial_state() {
    let harness = Harness::new(
        true,
        &["10.0.0.5"],
        RecordingExecutor {
            start_exit: 1,
            ..RecordingExecutor::default()
        },
    );
    let spec = spec();

    let err = harness.launcher().launch(&spec).await.unwrap_err();

    match &err {
        CntrError::RemoteStartFailed { instance, .. } => assert_eq!(*instance, spec.instance_name),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.category(), ErrorCategory::PartialState);
    assert_eq!(harness.remote.commands().len(), 2);
}

#[tokio::test]
async fn missing_ssh_key_is_a_precondition() {
    let harness = Harness::new(true, &["10.0.0.5"], RecordingExecutor::default());
    let key = harness.vms.records[0].ssh_key_path();
    std::fs::remove_file(&key).unwrap();

    let err = harness.launcher().launch(&spec()).await.unwrap_err();

    assert!(matches!(err, CntrError::CredentialNotFound { .. }));
    assert!(harness.remote.commands().is_empty());
}

#[tokio::test]
async fn mount_destination_with_comma_is_rejected_before_staging() {
    let harness = Harness::new(true, &["10.0.0.5"], RecordingExecutor::default());
    let spec = WorkloadSpec {
        mount: Some(MountSpec {
            source: PathBuf::from("/local/data.db"),
            destination: "/data/db,options=rw".to_string(),
        }),
        ..spec()
    };

    let err = harness.launcher().launch(&spec).await.unwrap_err();

    assert!(matches!(err, CntrError::InvalidMountPath { .. }), "{}", err);
    assert_eq!(err.category(), ErrorCategory::Precondition);
    assert!(harness.remote.commands().is_empty());
    assert!(harness.vms.copies.lock().unwrap().is_empty());
}
