//! Container runtime abstraction and the Docker implementation.
//!
//! The harness only needs "run this argv in this image with these limits
//! and give me the demuxed output", so the trait is a single `run` plus a
//! `ping` for readiness probes. The Docker implementation enforces the
//! full lockdown: no network, dropped capabilities, no-new-privileges,
//! non-root UID, read-only rootfs with a size-capped tmpfs, memory with
//! swap disabled, a PID cap and a CPU-time ulimit.

use crate::error::SandboxError;
use crate::limits::ResourceLimits;
use crate::protocol::OUTPUT_CAP_RAW;
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig, ResourcesUlimits};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    InspectContainerOptions, KillContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions, StatsOptionsBuilder, WaitContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Size cap for the writable tmpfs at /tmp (64 MiB).
const TMPFS_OPTS: &str = "rw,noexec,nosuid,size=67108864";

/// Non-root UID:GID the sandboxed process runs as.
const SANDBOX_USER: &str = "65534:65534";

/// In-container mount point of the job workspace.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// One container run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    pub argv: Vec<String>,
    /// KEY=VALUE pairs.
    pub env: Vec<String>,
    /// Host directory bound at [`WORKSPACE_MOUNT`].
    pub workspace_dir: PathBuf,
    /// Workspace writable (compile phase) or read-only (run phase).
    pub workspace_writable: bool,
    /// Bytes fed to stdin, then EOF.
    pub stdin: Option<Vec<u8>>,
    pub limits: ResourceLimits,
    /// Wall-clock deadline; the container is killed when it expires.
    pub deadline: Duration,
}

/// Captured outcome of one container run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time_ms: u64,
    pub peak_memory_kb: Option<u64>,
    /// The wall-clock deadline fired and the container was killed.
    pub timed_out: bool,
    /// The kernel OOM killer ended the run.
    pub oom_killed: bool,
}

/// Create/start/wait/kill lifecycle of ephemeral sandboxes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Reachability probe for readiness endpoints.
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Run to completion (or deadline) and collect output.
    async fn run(&self, spec: RunSpec) -> Result<RunOutput, SandboxError>;
}

/// Docker-backed runtime via bollard.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the default local socket.
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull the image when a create fails with "No such image".
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        debug!(image = %image, "Pulling sandbox image");

        let options = CreateImageOptionsBuilder::default()
            .from_image(image)
            .build();

        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress?;
        }

        Ok(())
    }

    fn host_config(&self, spec: &RunSpec) -> HostConfig {
        let mode = if spec.workspace_writable { "rw" } else { "ro" };
        let bind = format!(
            "{}:{}:{}",
            spec.workspace_dir.display(),
            WORKSPACE_MOUNT,
            mode
        );

        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), TMPFS_OPTS.to_string());

        let cpu_secs = spec.limits.cpu_time_secs();

        HostConfig {
            binds: Some(vec![bind]),
            memory: Some(spec.limits.memory_bytes()),
            // swap = memory disables swap entirely
            memory_swap: Some(spec.limits.memory_bytes()),
            pids_limit: Some(spec.limits.pids_limit),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            readonly_rootfs: Some(true),
            tmpfs: Some(tmpfs),
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("cpu".to_string()),
                soft: Some(cpu_secs),
                hard: Some(cpu_secs),
            }]),
            auto_remove: Some(false),
            ..Default::default()
        }
    }

    /// Sample container memory until cancelled, tracking the peak.
    fn spawn_memory_sampler(
        &self,
        container_id: String,
        mut cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Arc<AtomicU64> {
        let peak = Arc::new(AtomicU64::new(0));
        let peak_clone = Arc::clone(&peak);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let options = StatsOptionsBuilder::default()
                .stream(false)
                .one_shot(false)
                .build();

            loop {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                }

                let mut stats = docker.stats(&container_id, Some(options.clone()));
                if let Some(Ok(sample)) = stats.next().await {
                    let usage = sample
                        .memory_stats
                        .as_ref()
                        .and_then(|m| m.max_usage.or(m.usage));
                    if let Some(bytes) = usage {
                        peak_clone.fetch_max(bytes / 1024, Ordering::Relaxed);
                    }
                }
            }
        });

        peak
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutput, SandboxError> {
        let name = format!("exec-{}", Uuid::new_v4().simple());
        let wants_stdin = spec.stdin.is_some();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.argv.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            user: Some(SANDBOX_USER.to_string()),
            attach_stdin: Some(wants_stdin),
            open_stdin: Some(wants_stdin),
            stdin_once: Some(wants_stdin),
            host_config: Some(self.host_config(&spec)),
            ..Default::default()
        };

        let create_options = CreateContainerOptionsBuilder::default().name(&name).build();

        // Create, pulling the image on first use
        let created = match self
            .docker
            .create_container(Some(create_options.clone()), body.clone())
            .await
        {
            Ok(created) => created,
            Err(e) if e.to_string().contains("No such image") => {
                self.ensure_image(&spec.image).await?;
                self.docker
                    .create_container(Some(create_options), body)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        let container_id = created.id;

        let attach_options = AttachContainerOptionsBuilder::default()
            .stdin(wants_stdin)
            .stdout(true)
            .stderr(true)
            .stream(true)
            .build();

        let attach = match self
            .docker
            .attach_container(&container_id, Some(attach_options))
            .await
        {
            Ok(attach) => attach,
            Err(e) => {
                let _ = self.remove(&container_id).await;
                return Err(e.into());
            }
        };
        let mut output_stream = attach.output;
        let mut input = attach.input;

        // Collect demuxed output with the raw-level cap per stream
        let collector = tokio::spawn(async move {
            let mut stdout: Vec<u8> = Vec::new();
            let mut stderr: Vec<u8> = Vec::new();

            while let Some(frame) = output_stream.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) => {
                        let room = OUTPUT_CAP_RAW.saturating_sub(stdout.len());
                        stdout.extend_from_slice(&message[..message.len().min(room)]);
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        let room = OUTPUT_CAP_RAW.saturating_sub(stderr.len());
                        stderr.extend_from_slice(&message[..message.len().min(room)]);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            (stdout, stderr)
        });

        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let peak = self.spawn_memory_sampler(container_id.clone(), cancel_rx);

        let started = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
        {
            let _ = cancel_tx.send(true);
            let _ = self.remove(&container_id).await;
            return Err(e.into());
        }

        if let Some(bytes) = spec.stdin {
            if let Err(e) = input.write_all(&bytes).await {
                debug!(error = %e, "Short write to container stdin");
            }
            let _ = input.shutdown().await;
        }
        drop(input);

        // Block on whichever fires first: exit or the wall-clock deadline
        let mut wait_stream = self
            .docker
            .wait_container(&container_id, None::<WaitContainerOptions>);

        let mut timed_out = false;
        let exit_code = match tokio::time::timeout(spec.deadline, wait_stream.next()).await {
            Ok(Some(Ok(response))) => response.status_code,
            // bollard surfaces non-zero exits as a typed error
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => code,
            Ok(Some(Err(e))) => {
                let _ = cancel_tx.send(true);
                let _ = self.remove(&container_id).await;
                return Err(e.into());
            }
            Ok(None) => -1,
            Err(_elapsed) => {
                timed_out = true;
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions>)
                    .await
                {
                    warn!(container = %container_id, error = %e, "Failed to kill timed-out container");
                }
                137
            }
        };

        let wall_time_ms = started.elapsed().as_millis() as u64;
        let _ = cancel_tx.send(true);

        let oom_killed = self
            .docker
            .inspect_container(&container_id, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.oom_killed)
            .unwrap_or(false);

        let (stdout, stderr) = collector.await.unwrap_or_default();

        let _ = self.remove(&container_id).await;

        let peak_kb = peak.load(Ordering::Relaxed);
        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
            wall_time_ms,
            peak_memory_kb: (peak_kb > 0).then_some(peak_kb),
            timed_out,
            oom_killed,
        })
    }
}

impl DockerRuntime {
    async fn remove(&self, container_id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }
}
