//! Docker CLI backend
//!
//! Builds `docker` command lines and runs them with tokio's process API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::sandbox::{
    BackendError, EnvironmentInfo, IsolationBackend, LaunchSpec, RawOutput, SourceMount,
};
use crate::types::SandboxLimits;

/// Exit status docker uses for failures of the daemon or client itself
const DOCKER_ERROR: i32 = 125;

/// `docker ps` output format: id, a tab, then comma-separated `key=value` labels
const LIST_FORMAT: &str = "{{.ID}}\t{{.Labels}}";

/// Builder for docker command-line arguments
#[derive(Debug)]
pub struct DockerCommand {
    /// Path to the docker binary
    docker_path: PathBuf,
    action: DockerAction,
    /// --name (create) or the container to start or remove
    name: Option<String>,
    /// --label KEY=VALUE
    labels: Vec<(String, String)>,
    /// --filter label=KEY (list)
    label_filter: Option<String>,
    /// --network none
    network_disabled: bool,
    limits: SandboxLimits,
    mount: Option<SourceMount>,
    image: Option<String>,
    command: Vec<String>,
}

impl DockerCommand {
    /// Create a new docker command builder
    pub fn new(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
            action: DockerAction::Create,
            name: None,
            labels: Vec::new(),
            label_filter: None,
            network_disabled: true,
            limits: SandboxLimits::unset(),
            mount: None,
            image: None,
            command: Vec::new(),
        }
    }

    /// Build the `create` command for a launch spec
    pub fn for_launch(docker_path: impl Into<PathBuf>, spec: &LaunchSpec) -> Self {
        let mut cmd = Self::new(docker_path)
            .action(DockerAction::Create)
            .name(&spec.name)
            .network_disabled(spec.network_disabled)
            .limits(spec.limits.clone())
            .mount(spec.mount.clone())
            .image(&spec.image)
            .command(spec.command.iter().cloned());
        for (key, value) in &spec.labels {
            cmd = cmd.label(key, value);
        }
        cmd
    }

    /// Set the action to perform
    pub fn action(mut self, action: DockerAction) -> Self {
        self.action = action;
        self
    }

    /// Set the container name, or the container to act on
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Only list containers carrying this label key
    pub fn label_filter(mut self, key: impl Into<String>) -> Self {
        self.label_filter = Some(key.into());
        self
    }

    /// Disable networking inside the container
    pub fn network_disabled(mut self, disabled: bool) -> Self {
        self.network_disabled = disabled;
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bind the source artifact
    pub fn mount(mut self, mount: SourceMount) -> Self {
        self.mount = Some(mount);
        self
    }

    /// Set the image to run
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the arguments passed after the image
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.docker_path.to_string_lossy().into_owned()];

        match self.action {
            DockerAction::Start => {
                args.push("start".to_string());
                args.push("--attach".to_string());
                if let Some(name) = self.name {
                    args.push(name);
                }
            }
            DockerAction::Remove => {
                args.push("rm".to_string());
                args.push("--force".to_string());
                if let Some(name) = self.name {
                    args.push(name);
                }
            }
            DockerAction::List => {
                args.push("ps".to_string());
                args.push("--all".to_string());
                args.push("--no-trunc".to_string());
                if let Some(label) = self.label_filter {
                    args.push(format!("--filter=label={label}"));
                }
                args.push(format!("--format={LIST_FORMAT}"));
            }
            DockerAction::Create => {
                args.push("create".to_string());
                args.push("--rm".to_string());

                if let Some(name) = self.name {
                    args.push(format!("--name={name}"));
                }
                for (key, value) in &self.labels {
                    args.push(format!("--label={key}={value}"));
                }

                if self.network_disabled {
                    args.push("--network=none".to_string());
                }

                // Resource limits; swap is capped to memory so the ceiling is hard
                if let Some(memory) = self.limits.memory_limit {
                    args.push(format!("--memory={memory}m"));
                    args.push(format!("--memory-swap={memory}m"));
                }
                if let Some(cpus) = self.limits.cpu_limit {
                    args.push(format!("--cpus={cpus}"));
                }
                if let Some(procs) = self.limits.max_processes {
                    args.push(format!("--pids-limit={procs}"));
                }

                args.push("--cap-drop=ALL".to_string());
                args.push("--security-opt=no-new-privileges".to_string());

                if let Some(mount) = self.mount {
                    let mut spec = format!(
                        "type=bind,source={},target={}",
                        mount.host_path.display(),
                        mount.target
                    );
                    if mount.read_only {
                        spec.push_str(",readonly");
                    }
                    args.push(format!("--mount={spec}"));
                }

                if let Some(image) = self.image {
                    args.push(image);
                }
                args.extend(self.command);
            }
        }

        args
    }

    /// Get the docker binary path
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAction {
    /// Create a container without starting it
    Create,
    /// Start a created container and wait for it to exit
    Start,
    /// Force-remove a container
    Remove,
    /// List containers with their labels
    List,
}

/// [`IsolationBackend`] that shells out to the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_path: PathBuf,
}

impl DockerCli {
    pub fn new(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    /// Get the path to the docker binary
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    async fn output(&self, args: Vec<String>) -> Result<std::process::Output, BackendError> {
        let program = args
            .first()
            .ok_or_else(|| BackendError::CommandFailed("empty command arguments".to_string()))?;

        Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::from_spawn(program, e))
    }
}

#[async_trait]
impl IsolationBackend for DockerCli {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        let args = DockerCommand::for_launch(&self.docker_path, spec).build();
        debug!(?args, "running docker command");

        let output = self.output(args).await?;
        if !output.status.success() {
            // Nothing was created
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Unavailable(stderr.trim().to_string()));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(BackendError::CommandFailed(
                "docker create printed no container id".to_string(),
            ));
        }
        debug!(%id, "container created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start(&self, id: &str) -> Result<RawOutput, BackendError> {
        let args = DockerCommand::new(&self.docker_path)
            .action(DockerAction::Start)
            .name(id)
            .build();

        let output = self.output(args).await?;
        let exit_code = output.status.code();

        if exit_code == Some(DOCKER_ERROR) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Unavailable(stderr.trim().to_string()));
        }

        Ok(RawOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let args = DockerCommand::new(&self.docker_path)
            .action(DockerAction::Remove)
            .name(id)
            .build();

        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            debug!("container already gone");
            return Ok(());
        }

        Err(BackendError::CommandFailed(stderr.trim().to_string()))
    }

    #[instrument(skip(self))]
    async fn list(&self, label: &str) -> Result<Vec<EnvironmentInfo>, BackendError> {
        let args = DockerCommand::new(&self.docker_path)
            .action(DockerAction::List)
            .label_filter(label)
            .build();

        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Unavailable(stderr.trim().to_string()));
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `docker ps` output in [`LIST_FORMAT`]
fn parse_listing(stdout: &str) -> Vec<EnvironmentInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (id, labels) = line.split_once('\t').unwrap_or((line, ""));
            let id = id.trim();
            if id.is_empty() {
                return None;
            }

            let labels: HashMap<String, String> = labels
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .collect();

            Some(EnvironmentInfo {
                id: id.to_string(),
                labels,
            })
        })
        .collect()
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such container")
}
