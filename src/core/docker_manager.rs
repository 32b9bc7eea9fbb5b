use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::{BuildImageOptions, CommitContainerOptions};
use bollard::models::{HostConfig, ImageInspect};
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot reach container engine: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Request(String),
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        EngineError::Request(err.to_string())
    }
}

/// What to run in a new container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub privileged: bool,
}

/// A command to execute inside an existing container.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub privileged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

impl ExecState {
    pub fn succeeded(&self) -> bool {
        !self.running && self.exit_code == Some(0)
    }
}

/// The slice of the local container engine API the orchestrators need.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    /// Build `tag` from an in-memory tar build context. Returns the build log.
    async fn build_image(&self, context: Vec<u8>, tag: &str) -> Result<Vec<String>, EngineError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String, EngineError>;

    async fn start_exec(&self, exec_id: &str, detach: bool) -> Result<(), EngineError>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecState, EngineError>;

    /// Commit the container filesystem as `repository:tag`, returning the image ID.
    async fn commit_container(
        &self,
        id: &str,
        repository: &str,
        tag: &str,
    ) -> Result<String, EngineError>;
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    pub fn new() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerManager {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn build_image(&self, context: Vec<u8>, tag: &str) -> Result<Vec<String>, EngineError> {
        info!("🐳 Building image {}", tag);

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(hyper::Body::from(context)));

        let mut log = Vec::new();
        while let Some(item) = stream.next().await {
            let info = item?;
            if let Some(error) = info.error {
                return Err(EngineError::Request(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end().to_string();
                if !line.is_empty() {
                    debug!(tag, "{}", line);
                    log.push(line);
                }
            }
        }

        Ok(log)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        info!("🐳 Creating container: {} with image {}", spec.name, spec.image);

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self.docker.create_container(Some(options), config).await?;
        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        debug!(container = container_id, cmd = ?spec.cmd, "creating exec");

        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            privileged: Some(spec.privileged),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };
        let exec = self.docker.create_exec(container_id, options).await?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str, detach: bool) -> Result<(), EngineError> {
        let options = StartExecOptions {
            detach,
            ..Default::default()
        };
        self.docker.start_exec(exec_id, Some(options)).await?;
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecState, EngineError> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(ExecState {
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
        })
    }

    async fn commit_container(
        &self,
        id: &str,
        repository: &str,
        tag: &str,
    ) -> Result<String, EngineError> {
        let options = CommitContainerOptions {
            container: id.to_string(),
            repo: repository.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await?;

        // The commit response body does not decode into bollard's `Commit`
        // model, so the image id is read back from the tag just written.
        let reference = format!("{}:{}", repository, tag);
        let inspect = self.docker.inspect_image(&reference).await?;
        committed_image_id(inspect, &reference)
    }
}

fn committed_image_id(inspect: ImageInspect, reference: &str) -> Result<String, EngineError> {
    inspect
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EngineError::Request(format!("{} has no image ID after commit", reference)))
}
