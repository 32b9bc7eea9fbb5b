use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{self, HashAlg, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CommandOutput, DetachedCommand, RemoteExecutor, RemoteTarget};
use crate::config::RemoteSettings;
use crate::errors::{CntrError, CntrResult};

// Reported when the remote side closed the channel without an exit status
// (e.g. the command was killed by a signal), matching OpenSSH's client.
const NO_EXIT_STATUS: u32 = 255;

/// How the server's host key is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key, like `StrictHostKeyChecking=no`.
    AcceptAny,
    /// Require the key's SHA256 fingerprint (`SHA256:...`).
    Fingerprint(String),
}

struct HostKeyCheck {
    policy: HostKeyPolicy,
    mismatch: Arc<AtomicBool>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::Fingerprint(expected) => {
                let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
                if actual == *expected {
                    Ok(true)
                } else {
                    warn!(expected = %expected, actual = %actual, "host key mismatch");
                    self.mismatch.store(true, Ordering::SeqCst);
                    Ok(false)
                }
            }
        }
    }
}

/// One SSH connection and one session per call, torn down on every path.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
    command_timeout: Duration,
    host_keys: HostKeyPolicy,
}

impl SshExecutor {
    pub fn new(settings: &RemoteSettings) -> Self {
        let host_keys = match &settings.host_key_fingerprint {
            Some(fingerprint) => HostKeyPolicy::Fingerprint(fingerprint.clone()),
            None => {
                warn!("SSH host keys are not verified; set remote.host_key_fingerprint to pin one");
                HostKeyPolicy::AcceptAny
            }
        };

        Self {
            connect_timeout: settings.connect_timeout(),
            command_timeout: settings.command_timeout(),
            host_keys,
        }
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    async fn connect(&self, target: &RemoteTarget) -> CntrResult<Handle<HostKeyCheck>> {
        check_credential(&target.credential_path).await?;
        let key = load_key(&target.credential_path).await?;

        let mismatch = Arc::new(AtomicBool::new(false));
        let handler = HostKeyCheck {
            policy: self.host_keys.clone(),
            mismatch: mismatch.clone(),
        };
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.command_timeout),
            ..Default::default()
        });

        debug!(%target, key = %target.credential_path.display(), "connecting SSH");

        let connecting = client::connect(config, (target.address, target.port), handler);
        let mut handle = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => {
                return Err(CntrError::ConnectTimeout {
                    address: target.to_string(),
                })
            }
            Ok(Err(_)) if mismatch.load(Ordering::SeqCst) => {
                return Err(CntrError::HostKeyMismatch {
                    address: target.to_string(),
                })
            }
            Ok(Err(e)) => return Err(CntrError::Ssh(e)),
            Ok(Ok(handle)) => handle,
        };

        let auth = handle
            .authenticate_publickey(&target.user, PrivateKeyWithHashAlg::new(Arc::new(key), None))
            .await?;
        if !auth.success() {
            return Err(CntrError::AuthenticationFailed {
                address: target.to_string(),
                user: target.user.clone(),
            });
        }

        Ok(handle)
    }

    fn timeout_error(&self) -> CntrError {
        CntrError::Timeout {
            operation: "remote command".to_string(),
            seconds: self.command_timeout.as_secs(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_command(&self, target: &RemoteTarget, command: &str) -> CntrResult<CommandOutput> {
        info!("🔑 Running on {}: {}", target, command);

        let session = async {
            let handle = self.connect(target).await?;
            let output = collect_output(&handle, command).await;
            hang_up(handle).await;
            output
        };

        let output = tokio::time::timeout(self.command_timeout, session)
            .await
            .map_err(|_| self.timeout_error())??;

        if output.exit_status != 0 {
            return Err(CntrError::RemoteCommandFailed {
                exit_status: output.exit_status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }

    async fn start_command(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> CntrResult<DetachedCommand> {
        info!("🔑 Starting on {}: {}", target, command);

        let handle = self.connect(target).await?;
        let mut channel = handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let deadline = self.command_timeout;
        let timeout_error = self.timeout_error();
        Ok(DetachedCommand::spawn(async move {
            let wait = async {
                let mut exit_status = None;
                while let Some(msg) = channel.wait().await {
                    if let ChannelMsg::ExitStatus { exit_status: code } = msg {
                        exit_status = Some(code);
                    }
                }
                exit_status.unwrap_or(NO_EXIT_STATUS)
            };
            let result = tokio::time::timeout(deadline, wait)
                .await
                .map_err(|_| timeout_error);
            hang_up(handle).await;
            result
        }))
    }
}

async fn collect_output(
    handle: &Handle<HostKeyCheck>,
    command: &str,
) -> CntrResult<CommandOutput> {
    let mut channel = handle.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut output = CommandOutput::default();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(&data[..]),
            ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                output.stderr.extend_from_slice(&data[..])
            }
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    output.exit_status = exit_status.unwrap_or(NO_EXIT_STATUS);
    Ok(output)
}

async fn hang_up(handle: Handle<HostKeyCheck>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("SSH disconnect: {}", e);
    }
}

/// The identity file must exist and be a regular file.
pub async fn check_credential(path: &Path) -> CntrResult<()> {
    match tokio::fs::metadata(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Err(CntrError::CredentialNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(CntrError::Io(e)),
        Ok(meta) if meta.is_dir() => Err(CntrError::CredentialIsDirectory {
            path: path.to_path_buf(),
        }),
        Ok(meta) if !meta.is_file() => Err(CntrError::CredentialNotFound {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
    }
}

async fn load_key(path: &Path) -> CntrResult<keys::PrivateKey> {
    let pem = tokio::fs::read_to_string(path).await?;
    keys::decode_secret_key(&pem, None).map_err(|e| CntrError::InvalidCredential {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
