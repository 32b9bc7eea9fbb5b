/*
* ignite-cntr Command Line Interface
* ----------------------------------
*
* Command Structure:
*
* ignite-cntr
* ├── image
* │   ├── base [TARGET] [-b SRC]          // containerd base image via the local engine
* │   └── vm <TARGET> [-i IMG]... [-b BASE] // bake app images into a VM image
* ├── run <VM> <IMAGE> [...]              // create + start a workload inside a VM
* ├── stop <VM>                           // passthrough to ignite
* ├── rm <VM> [-f]                        // passthrough to ignite
* └── init [--force]                      // write config/default.toml
*
* Every failure ends the process with a non-zero code chosen by the error's
* category (see `errors::ErrorCategory::exit_code`).
*
* Usage Examples:
* ```bash
* ignite-cntr image base
* ignite-cntr image vm my-vm-image:v1 -i docker.io/library/nginx:latest
* ignite-cntr run my-vm docker.io/library/nginx:latest -e A=1 --net-host
* ignite-cntr run my-vm app:latest --mount-src ./data.db --mount-dest /data/db
* ```
*/

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{generate_default_config, settings::CONFIG_DIR_ENV, Settings};
use crate::core::{DockerManager, IgniteManager, VmManager};
use crate::errors::{CntrError, CntrResult};
use crate::image::{BuildSpec, ImageBuilder, VmImageComposer};
use crate::remote::SshExecutor;
use crate::utils::parse_target_ref;
use crate::workload::{combined_env, MountSpec, WorkloadLauncher, WorkloadSpec};

#[derive(Parser, Debug)]
#[command(name = "ignite-cntr")]
#[command(about = "Build containerd VM images for ignite and run containers inside the VMs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Read settings from this file instead of the config directory
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build images
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Run a container inside a running VM
    Run(RunArgs),
    /// Stop a VM
    Stop {
        vm: String,
    },
    /// Remove a VM
    Rm {
        vm: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImageCommands {
    /// Build the containerd base image
    Base {
        /// Tag for the built image
        target: Option<String>,
        /// Image to build from
        #[arg(short = 'b', long = "baseImage")]
        base_image: Option<String>,
    },
    /// Build a VM image with application images pre-pulled
    Vm {
        /// Tag for the VM image
        target: String,
        /// Application image to pull (repeatable)
        #[arg(short = 'i', long = "image")]
        images: Vec<String>,
        /// containerd base image to start from
        #[arg(short = 'b', long = "baseImage")]
        base_image: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// VM name or UID prefix
    pub vm: String,
    /// Application image
    pub image: String,
    /// KEY=VALUE (repeatable)
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,
    /// File of KEY=VALUE lines (repeatable)
    #[arg(long = "env-file")]
    pub env_files: Vec<PathBuf>,
    /// Command to run in the container
    #[arg(short = 'c', long = "cmd")]
    pub cmd: Option<String>,
    /// Argument for --cmd (repeatable)
    #[arg(short = 'a', long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Use the VM's network namespace
    #[arg(long = "net-host")]
    pub net_host: bool,
    /// Local file to mount read-only
    #[arg(long = "mount-src")]
    pub mount_src: Option<String>,
    /// Path of the mount inside the container
    #[arg(long = "mount-dest")]
    pub mount_dest: Option<String>,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::new_from_file(path).map_err(CntrError::from)?,
        None => Settings::new().map_err(CntrError::from)?,
    };

    match cli.command {
        Commands::Image { command } => handle_image_command(command, &settings).await?,
        Commands::Run(args) => handle_run_command(args, &settings).await?,
        Commands::Stop { vm } => {
            let vms = IgniteManager::new(&settings.ignite);
            let uid = lookup_vm(&vms, &vm).await?;
            vms.stop(&uid).await?;
            println!("{} VM '{}' stopped", "✓".green(), vm);
        }
        Commands::Rm { vm, force } => {
            let vms = IgniteManager::new(&settings.ignite);
            let uid = lookup_vm(&vms, &vm).await?;
            vms.remove(&uid, force).await?;
            println!("{} VM '{}' removed", "✓".green(), vm);
        }
        Commands::Init { force } => handle_init_command(force)?,
    }

    Ok(())
}

async fn handle_image_command(command: ImageCommands, settings: &Settings) -> CntrResult<()> {
    if let ImageCommands::Vm { target, .. } | ImageCommands::Base { target: Some(target), .. } = &command {
        parse_target_ref(target)?;
    }

    let engine = Arc::new(
        DockerManager::new().map_err(|e| CntrError::EngineUnavailable(e.to_string()))?,
    );

    match command {
        ImageCommands::Base { target, base_image } => {
            let target = target.unwrap_or_else(|| settings.images.base_image.clone());
            let base = base_image.unwrap_or_else(|| settings.images.base_source.clone());

            let built = ImageBuilder::new(engine)
                .build(&BuildSpec::from_template(&base, &target))
                .await?;
            println!("{} Base image '{}' built from '{}'", "✓".green(), built, base);
        }
        ImageCommands::Vm {
            target,
            images,
            base_image,
        } => {
            let base = base_image.unwrap_or_else(|| settings.images.base_image.clone());
            info!("Composing VM image {} from {} with {} image(s)", target, base, images.len());

            let composer =
                VmImageComposer::new(engine, settings.runtime.clone(), settings.compose.clone());
            let report = composer.compose(&base, &target, &images).await?;

            if let Some(image) = report.image() {
                println!("{} VM image '{}' committed ({})", "✓".green(), image.reference(), image.digest);
            }
            for pulled in &report.session.pulled_images {
                println!("  - {}", pulled);
            }
            if let Some(leaked) = &report.leaked_container {
                println!(
                    "{} build container {} was left behind; remove it with `docker rm -f {}`",
                    "!".yellow(),
                    leaked,
                    leaked
                );
            }
        }
    }

    Ok(())
}

async fn handle_run_command(args: RunArgs, settings: &Settings) -> CntrResult<()> {
    let mount = MountSpec::from_flags(args.mount_src.as_deref(), args.mount_dest.as_deref())?;
    let env = combined_env(&args.env, &args.env_files)?;

    let spec = WorkloadSpec {
        command: args.cmd,
        command_args: args.args,
        env,
        host_network: args.net_host,
        mount,
        ..WorkloadSpec::new(&args.vm, &args.image, &settings.workload.instance_prefix)
    };

    let vms: Arc<dyn VmManager> = Arc::new(IgniteManager::new(&settings.ignite));
    let remote = Arc::new(SshExecutor::new(&settings.remote));
    let launcher = WorkloadLauncher::new(vms, remote, settings);

    let report = match launcher.launch(&spec).await {
        Ok(report) => report,
        Err(e) => {
            if let Some((stdout, stderr)) = e.remote_output() {
                print_remote_output(stdout, stderr);
            }
            return Err(e);
        }
    };

    print_remote_output(&report.create_output.stdout, &report.create_output.stderr);
    println!(
        "{} Container '{}' running on VM '{}' ({})",
        "✓".green(),
        report.instance_name,
        report.vm,
        report.address
    );
    Ok(())
}

async fn lookup_vm(vms: &IgniteManager, identifier: &str) -> CntrResult<String> {
    vms.find(identifier)
        .await?
        .map(|record| record.uid)
        .ok_or_else(|| CntrError::VmNotFound {
            vm: identifier.to_string(),
        })
}

fn print_remote_output(stdout: &[u8], stderr: &[u8]) {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    if !stdout.trim().is_empty() {
        println!("{}", stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        eprintln!("{}", stderr.trim_end().yellow());
    }
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir =
        PathBuf::from(std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "config".to_string()));
    let config_file = config_dir.join("default.toml");
    if config_file.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            config_file.display()
        );
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("cannot create {}", config_dir.display()))?;
    let default_config = generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&config_file, config_str)
        .with_context(|| format!("cannot write {}", config_file.display()))?;

    println!("{} Default configuration written to {}", "✓".green(), config_file.display());
    Ok(())
}
