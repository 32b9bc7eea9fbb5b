use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::docker_manager::EngineError;

#[derive(Error, Debug)]
pub enum CntrError {
    // Preconditions
    #[error("this command needs to be run as root")]
    PermissionDenied,

    #[error("identity file not found: {}", path.display())]
    CredentialNotFound { path: PathBuf },

    #[error("identity file path is a directory, want a file: {}", path.display())]
    CredentialIsDirectory { path: PathBuf },

    #[error("cannot use identity file {}: {message}", path.display())]
    InvalidCredential { path: PathBuf, message: String },

    #[error("--mount-src {source_path} given without --mount-dest")]
    MissingMountDestination { source_path: String },

    #[error("invalid env file {}: {message}", path.display())]
    InvalidEnvFile { path: PathBuf, message: String },

    #[error("invalid mount path {path:?}: {reason}")]
    InvalidMountPath { path: String, reason: String },

    #[error("invalid image reference {reference:?}: {message}")]
    InvalidImageRef { reference: String, message: String },

    // Resolution
    #[error("VM {vm:?} not found")]
    VmNotFound { vm: String },

    #[error("VM {vm:?} is not running")]
    VmNotRunning { vm: String },

    #[error("VM {vm:?} has no usable IP addresses")]
    NoUsableAddress { vm: String },

    #[error("identifier {vm:?} matches more than one VM: {}", matches.join(", "))]
    AmbiguousVm { vm: String, matches: Vec<String> },

    #[error("VM manager error: {0}")]
    VmManager(String),

    // Remote execution
    #[error("timed out connecting to {address}")]
    ConnectTimeout { address: String },

    #[error("host key of {address} does not match the pinned fingerprint")]
    HostKeyMismatch { address: String },

    #[error("SSH authentication as {user:?} rejected by {address}")]
    AuthenticationFailed { address: String, user: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("remote command exited with status {exit_status}: {}", String::from_utf8_lossy(stderr).trim())]
    RemoteCommandFailed {
        exit_status: u32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    // Engine orchestration
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("failed to start build container: {0}")]
    ContainerStartFailed(String),

    #[error("failed to start containerd in build container: {0}")]
    RuntimeStartFailed(String),

    #[error("failed to create containerd namespace: {0}")]
    NamespaceCreateFailed(String),

    #[error("failed to pull {image}: {message}")]
    PullFailed { image: String, message: String },

    #[error("failed to commit build container: {0}")]
    CommitFailed(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    // Workload
    #[error("failed to stage mount source: {0}")]
    MountPrepFailed(String),

    #[error("failed to create container {instance}: {source}")]
    RemoteCreateFailed {
        instance: String,
        #[source]
        source: Box<CntrError>,
    },

    #[error("container {instance} was created but failed to start: {source}")]
    RemoteStartFailed {
        instance: String,
        #[source]
        source: Box<CntrError>,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure classes, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Precondition,
    Resolution,
    RemoteExecution,
    EngineOrchestration,
    PartialState,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Resolution => write!(f, "resolution"),
            ErrorCategory::RemoteExecution => write!(f, "remote execution"),
            ErrorCategory::EngineOrchestration => write!(f, "engine"),
            ErrorCategory::PartialState => write!(f, "partial state"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl ErrorCategory {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Internal => 1,
            ErrorCategory::Precondition => 2,
            ErrorCategory::Resolution => 3,
            ErrorCategory::RemoteExecution => 4,
            ErrorCategory::EngineOrchestration => 5,
            ErrorCategory::PartialState => 6,
        }
    }
}

impl CntrError {
    pub fn category(&self) -> ErrorCategory {
        use CntrError::*;
        match self {
            PermissionDenied
            | CredentialNotFound { .. }
            | CredentialIsDirectory { .. }
            | InvalidCredential { .. }
            | MissingMountDestination { .. }
            | InvalidEnvFile { .. }
            | InvalidMountPath { .. }
            | InvalidImageRef { .. } => ErrorCategory::Precondition,

            VmNotFound { .. }
            | VmNotRunning { .. }
            | NoUsableAddress { .. }
            | AmbiguousVm { .. }
            | VmManager(_) => ErrorCategory::Resolution,

            ConnectTimeout { .. }
            | HostKeyMismatch { .. }
            | AuthenticationFailed { .. }
            | Ssh(_)
            | RemoteCommandFailed { .. }
            | RemoteCreateFailed { .. }
            | MountPrepFailed(_)
            | Timeout { .. } => ErrorCategory::RemoteExecution,

            EngineUnavailable(_)
            | BuildFailed(_)
            | ContainerStartFailed(_)
            | RuntimeStartFailed(_)
            | NamespaceCreateFailed(_)
            | PullFailed { .. }
            | CommitFailed(_)
            | Engine(_) => ErrorCategory::EngineOrchestration,

            RemoteStartFailed { .. } => ErrorCategory::PartialState,

            Config(_) | Io(_) => ErrorCategory::Internal,
        }
    }

    /// Captured remote output, if this error carries any.
    pub fn remote_output(&self) -> Option<(&[u8], &[u8])> {
        match self {
            CntrError::RemoteCommandFailed { stdout, stderr, .. } => {
                Some((stdout.as_slice(), stderr.as_slice()))
            }
            CntrError::RemoteCreateFailed { source, .. }
            | CntrError::RemoteStartFailed { source, .. } => source.remote_output(),
            _ => None,
        }
    }
}

pub type CntrResult<T> = Result<T, CntrError>;
