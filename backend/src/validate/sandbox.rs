//! Isolated execution of validation tools

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::BackendError;

/// One tool invocation inside a throwaway container
#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub image: String,
    /// Host directory mounted at `/data`
    pub mount: PathBuf,
    /// Working directory inside the container
    pub workdir: String,
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl SandboxJob {
    pub fn new(image: &str, mount: &Path, args: &[&str], timeout: Duration) -> Self {
        Self {
            image: image.to_string(),
            mount: mount.to_path_buf(),
            workdir: "/data".to_string(),
            env: Vec::new(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

/// Outcome of a sandboxed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    Exited { code: i32, stdout: String, stderr: String },
    TimedOut,
}

impl SandboxOutcome {
    pub fn success(&self) -> bool {
        matches!(self, SandboxOutcome::Exited { code: 0, .. })
    }

    /// Combined stdout and stderr
    pub fn output(&self) -> String {
        match self {
            SandboxOutcome::Exited { stdout, stderr, .. } => format!("{}{}", stdout, stderr),
            SandboxOutcome::TimedOut => String::new(),
        }
    }
}

/// Runs tool invocations in isolation
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, BackendError>;
}

/// Sandbox backed by `docker run --rm`
///
/// The container runs as the owner of the mounted directory so that every
/// file it creates can be removed with the workspace.
pub struct DockerSandbox {
    docker: String,
}

impl DockerSandbox {
    pub fn new(docker: &str) -> Self {
        Self {
            docker: docker.to_string(),
        }
    }

    async fn force_remove(&self, name: &str) {
        let result = Command::new(&self.docker)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!("Failed to remove container {}: {}", name, e);
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, BackendError> {
        let name = format!("infraflow-validate-{}", uuid::Uuid::new_v4());
        let mount = format!("{}:/data", job.mount.display());

        let mut cmd = Command::new(&self.docker);
        cmd.args([
            "run",
            "--rm",
            "--name",
            name.as_str(),
            "-v",
            mount.as_str(),
            "-w",
            job.workdir.as_str(),
        ]);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if let Ok(meta) = std::fs::metadata(&job.mount) {
                cmd.arg("--user")
                    .arg(format!("{}:{}", meta.uid(), meta.gid()))
                    .arg("-e")
                    .arg("HOME=/tmp");
            }
        }
        for (key, value) in &job.env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        cmd.arg(&job.image)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Sandbox {} running {} {:?}", name, job.image, job.args);
        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Transport(format!("failed to start docker: {}", e)))?;

        match tokio::time::timeout(job.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.map_err(|e| BackendError::Transport(e.to_string()))?;
                Ok(SandboxOutcome::Exited {
                    code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            }
            Err(_) => {
                warn!("Sandbox {} timed out after {}s", name, job.timeout.as_secs());
                self.force_remove(&name).await;
                Ok(SandboxOutcome::TimedOut)
            }
        }
    }
}
