/*
* VM Image Composer
* -----------------
*
* Bakes application images into a VM image:
*
*   Created -> Started -> RuntimeStarting -> NamespaceReady
*           -> Pulling(1..N) -> Committed -> Removed
*
* A privileged "build" container is started from the base image with a
* placeholder process, containerd is launched inside it, every app image is
* pulled into the containerd namespace one at a time, and the container is
* committed as the VM image.
*
* The build container is owned by a `BuildContainer` guard from the moment it
* exists. `compose` releases it exactly once after the pull/commit phase,
* whichever state that phase stopped in. If the guard is dropped unreleased
* (panic, cancelled future) it schedules the force-remove itself.
*/

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ComposeSettings, RuntimeSettings};
use crate::core::docker_manager::{ContainerEngine, ContainerSpec, EngineError, ExecSpec, ExecState};
use crate::errors::{CntrError, CntrResult};
use crate::utils::{generate_name, parse_target_ref, poll_until, PollError};

const PLACEHOLDER_CMD: [&str; 2] = ["sleep", "infinity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeState {
    Created,
    Started,
    RuntimeStarting,
    NamespaceReady,
    /// Pulling the i-th image, counting from 1.
    Pulling(usize),
    Committed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl CommittedImage {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone)]
pub struct ComposeSession {
    pub build_container_id: String,
    pub build_container_name: String,
    pub base_image: String,
    pub namespace: String,
    pub state: ComposeState,
    pub pulled_images: Vec<String>,
    pub committed: Option<CommittedImage>,
}

impl ComposeSession {
    fn advance(&mut self, state: ComposeState) {
        debug!(container = %self.build_container_name, from = ?self.state, to = ?state, "compose state");
        self.state = state;
    }
}

#[derive(Debug, Clone)]
pub struct ComposeReport {
    pub session: ComposeSession,
    /// Set when the image was committed but the build container could not be removed.
    pub leaked_container: Option<String>,
}

impl ComposeReport {
    pub fn image(&self) -> Option<&CommittedImage> {
        self.session.committed.as_ref()
    }
}

/// Owns the ephemeral build container until it is released.
pub struct BuildContainer {
    engine: Arc<dyn ContainerEngine>,
    id: String,
    released: bool,
}

impl BuildContainer {
    pub fn new(engine: Arc<dyn ContainerEngine>, id: String) -> Self {
        Self {
            engine,
            id,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Force-remove the container. Consumes the guard, so it runs at most once.
    pub async fn release(mut self) -> Result<(), EngineError> {
        self.released = true;
        info!("🧹 Removing build container {}", self.id);
        self.engine.remove_container(&self.id, true).await
    }
}

impl Drop for BuildContainer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Build container {} abandoned, removing in background", id);
                let engine = self.engine.clone();
                runtime.spawn(async move {
                    if let Err(e) = engine.remove_container(&id, true).await {
                        warn!("Failed to remove abandoned build container {}: {}", id, e);
                    }
                });
            }
            Err(_) => warn!("Build container {} abandoned outside a runtime; remove it by hand", id),
        }
    }
}

pub struct VmImageComposer {
    engine: Arc<dyn ContainerEngine>,
    runtime: RuntimeSettings,
    settings: ComposeSettings,
}

impl VmImageComposer {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        runtime: RuntimeSettings,
        settings: ComposeSettings,
    ) -> Self {
        Self {
            engine,
            runtime,
            settings,
        }
    }

    pub async fn compose(
        &self,
        base_image: &str,
        target_image: &str,
        app_images: &[String],
    ) -> CntrResult<ComposeReport> {
        let (repository, tag) = parse_target_ref(target_image)?;
        self.engine
            .ping()
            .await
            .map_err(|e| CntrError::EngineUnavailable(e.to_string()))?;

        let name = generate_name(&self.settings.build_container_prefix);

        let spec = ContainerSpec {
            name: name.clone(),
            image: base_image.to_string(),
            cmd: PLACEHOLDER_CMD.iter().map(|s| s.to_string()).collect(),
            privileged: true,
        };
        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| CntrError::ContainerStartFailed(e.to_string()))?;
        let container = BuildContainer::new(self.engine.clone(), id.clone());

        let mut session = ComposeSession {
            build_container_id: id,
            build_container_name: name,
            base_image: base_image.to_string(),
            namespace: self.runtime.namespace.clone(),
            state: ComposeState::Created,
            pulled_images: Vec::new(),
            committed: None,
        };

        let outcome = self
            .assemble(&mut session, &repository, &tag, app_images)
            .await;
        let teardown = container.release().await;
        if teardown.is_ok() {
            session.advance(ComposeState::Removed);
        }

        match (outcome, teardown) {
            (Ok(()), Ok(())) => Ok(ComposeReport {
                session,
                leaked_container: None,
            }),
            (Ok(()), Err(e)) => {
                warn!(
                    "VM image committed, but build container {} was not removed: {}",
                    session.build_container_name, e
                );
                let leaked = Some(session.build_container_id.clone());
                Ok(ComposeReport {
                    session,
                    leaked_container: leaked,
                })
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_error)) => {
                warn!(
                    "Build container {} was not removed: {}",
                    session.build_container_name, teardown_error
                );
                Err(e)
            }
        }
    }

    async fn assemble(
        &self,
        session: &mut ComposeSession,
        repository: &str,
        tag: &str,
        app_images: &[String],
    ) -> CntrResult<()> {
        let id = session.build_container_id.clone();

        self.engine
            .start_container(&id)
            .await
            .map_err(|e| CntrError::ContainerStartFailed(e.to_string()))?;
        session.advance(ComposeState::Started);
        info!("Started build container {}", session.build_container_name);

        info!("Starting containerd in the build container...");
        self.start_runtime(&id).await?;
        session.advance(ComposeState::RuntimeStarting);
        if self.settings.wait_for_runtime {
            self.wait_for_runtime(&id).await?;
        }

        info!("Creating containerd namespace: {}...", session.namespace);
        let create_ns = self.ctr(&["namespace", "create", &session.namespace]);
        let state = self
            .run_exec(&id, create_ns, self.settings.runtime_ready_timeout())
            .await
            .map_err(|e| CntrError::NamespaceCreateFailed(e.to_string()))?;
        if !state.succeeded() {
            return Err(CntrError::NamespaceCreateFailed(exit_message(&state)));
        }
        session.advance(ComposeState::NamespaceReady);

        for (index, image) in app_images.iter().enumerate() {
            session.advance(ComposeState::Pulling(index + 1));
            info!("Waiting for {} image pull to complete...", image);

            let namespace_flag = format!("--namespace={}", session.namespace);
            let pull = self.ctr(&[&namespace_flag, "image", "pull", image]);
            let state = self
                .run_exec(&id, pull, self.settings.pull_timeout())
                .await
                .map_err(|e| CntrError::PullFailed {
                    image: image.clone(),
                    message: e.to_string(),
                })?;
            if !state.succeeded() {
                return Err(CntrError::PullFailed {
                    image: image.clone(),
                    message: exit_message(&state),
                });
            }

            session.pulled_images.push(image.clone());
            info!("✓ Pulled {}", image);
        }

        let digest = self
            .engine
            .commit_container(&id, repository, tag)
            .await
            .map_err(|e| CntrError::CommitFailed(e.to_string()))?;
        session.committed = Some(CommittedImage {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
        });
        session.advance(ComposeState::Committed);

        Ok(())
    }

    async fn start_runtime(&self, container: &str) -> CntrResult<()> {
        let spec = ExecSpec {
            cmd: vec![self.runtime.containerd_path.clone()],
            privileged: true,
        };
        let exec = self
            .engine
            .create_exec(container, &spec)
            .await
            .map_err(|e| CntrError::RuntimeStartFailed(e.to_string()))?;
        self.engine
            .start_exec(&exec, true)
            .await
            .map_err(|e| CntrError::RuntimeStartFailed(e.to_string()))
    }

    /// Probe `ctr version` until containerd answers.
    async fn wait_for_runtime(&self, container: &str) -> CntrResult<()> {
        let deadline = self.settings.runtime_ready_timeout();
        let this = self;
        poll_until(self.settings.poll_interval(), deadline, move || async move {
            let probe = this.ctr(&["version"]);
            let state = this.run_exec(container, probe, deadline).await?;
            Ok::<_, PollError<EngineError>>(state.succeeded().then_some(()))
        })
        .await
        .map_err(|e| {
            let message = match e {
                PollError::Deadline(d) => format!("containerd not ready after {}s", d.as_secs()),
                PollError::Probe(inner) => inner.to_string(),
            };
            CntrError::RuntimeStartFailed(message)
        })?;

        debug!(container, "containerd is ready");
        Ok(())
    }

    /// Run an exec detached and poll it until it stops running.
    async fn run_exec(
        &self,
        container: &str,
        spec: ExecSpec,
        deadline: Duration,
    ) -> Result<ExecState, PollError<EngineError>> {
        let exec = self
            .engine
            .create_exec(container, &spec)
            .await
            .map_err(PollError::Probe)?;
        self.engine
            .start_exec(&exec, true)
            .await
            .map_err(PollError::Probe)?;

        let engine = &self.engine;
        let exec = exec.as_str();
        poll_until(self.settings.poll_interval(), deadline, move || async move {
            let state = engine.inspect_exec(exec).await?;
            Ok::<_, EngineError>(if state.running { None } else { Some(state) })
        })
        .await
    }

    fn ctr(&self, args: &[&str]) -> ExecSpec {
        let mut cmd = vec![self.runtime.ctr_path.clone()];
        cmd.extend(args.iter().map(|s| s.to_string()));
        ExecSpec {
            cmd,
            privileged: true,
        }
    }
}

fn exit_message(state: &ExecState) -> String {
    match state.exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "exited without a status".to_string(),
    }
}
