/*
* ignite-cntr Configuration
* -------------------------
*
* Layered settings, lowest to highest priority:
*
* 1. Built-in defaults (`Settings::default()`)
* 2. <config dir>/default.{toml,yaml,json}   (optional)
* 3. <config dir>/local.{toml,yaml,json}     (optional)
* 4. Environment variables, e.g. IGNITE_CNTR__REMOTE__USER=core
*
* The config directory comes from IGNITE_CNTR_CONFIG_DIR and defaults to
* ./config. `--config <file>` on the command line replaces steps 2 and 3 with
* that single file.
*
* Sections:
* - runtime:  containerd binaries and namespace inside the VM image
* - images:   default base image source and tag
* - compose:  build container naming and poll/deadline tuning
* - remote:   SSH user, port, timeouts and host key pinning
* - ignite:   VM object store location, ignite binary, mount staging dir
* - workload: instance naming
*
* The resolved struct is passed to every orchestrator explicitly; nothing
* reads process-wide state after startup.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_DIR_ENV: &str = "IGNITE_CNTR_CONFIG_DIR";
pub const ENV_PREFIX: &str = "IGNITE_CNTR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub images: ImageSettings,
    pub compose: ComposeSettings,
    pub remote: RemoteSettings,
    pub ignite: IgniteSettings,
    pub workload: WorkloadSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub ctr_path: String,
    pub containerd_path: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Image the base recipe starts `FROM`.
    pub base_source: String,
    /// Tag given to the built base image, and the default base of `image vm`.
    pub base_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    pub build_container_prefix: String,
    pub poll_interval_ms: u64,
    pub wait_for_runtime: bool,
    pub runtime_ready_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// SHA256 host key fingerprint ("SHA256:..."). Unset accepts any host key.
    pub host_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgniteSettings {
    pub data_dir: PathBuf,
    pub binary: String,
    pub staging_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub instance_prefix: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ctr_path: "/usr/bin/ctr".to_string(),
            containerd_path: "/usr/bin/containerd".to_string(),
            namespace: "ignite".to_string(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            base_source: "weaveworks/ignite-ubuntu:latest".to_string(),
            base_image: "ignite-cntr/base:dev".to_string(),
        }
    }
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            build_container_prefix: "ignite-cntr-build".to_string(),
            poll_interval_ms: 3000,
            wait_for_runtime: true,
            runtime_ready_timeout_secs: 30,
            pull_timeout_secs: 900,
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            connect_timeout_secs: 1,
            command_timeout_secs: 300,
            host_key_fingerprint: None,
        }
    }
}

impl Default for IgniteSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/firecracker"),
            binary: "ignite".to_string(),
            staging_dir: "/var/lib/ignite-cntr/mounts".to_string(),
        }
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            instance_prefix: "container-app".to_string(),
        }
    }
}

impl ComposeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn runtime_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_ready_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

impl RemoteSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Settings {
    /// Load from the config directory (`IGNITE_CNTR_CONFIG_DIR`, default `config`).
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir =
            std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "config".to_string());

        info!("Loading configuration from path: {}", config_dir);

        Self::builder()?
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load from a single explicit file on top of the defaults.
    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        Self::builder()?
            .add_source(File::from(path))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = Config::try_from(&Settings::default())?;
        Ok(Config::builder().add_source(defaults))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}
