pub mod command;
pub mod ssh;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::task::JoinHandle;

use crate::errors::{CntrError, CntrResult};

pub use command::CommandLine;
pub use ssh::{HostKeyPolicy, SshExecutor};

/// Where and as whom a remote command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub address: IpAddr,
    pub port: u16,
    pub user: String,
    pub credential_path: PathBuf,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            IpAddr::V6(addr) => write!(f, "{}@[{}]:{}", self.user, addr, self.port),
            IpAddr::V4(addr) => write!(f, "{}@{}:{}", self.user, addr, self.port),
        }
    }
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A remote command that was dispatched without waiting for it.
///
/// Dropping the handle leaves the command running to completion in the
/// background; `wait` collects its exit status.
pub struct DetachedCommand {
    task: JoinHandle<CntrResult<u32>>,
}

impl DetachedCommand {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = CntrResult<u32>> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> CntrResult<u32> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CntrError::Io(std::io::Error::other(format!(
                "detached remote command task failed: {}",
                e
            )))),
        }
    }
}

impl fmt::Debug for DetachedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedCommand")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Runs command lines on a remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run to completion. A non-zero exit is `RemoteCommandFailed` carrying the output.
    async fn run_command(&self, target: &RemoteTarget, command: &str) -> CntrResult<CommandOutput>;

    /// Dispatch and return once the command has been accepted by the remote side.
    async fn start_command(&self, target: &RemoteTarget, command: &str)
        -> CntrResult<DetachedCommand>;
}
