//! SSH client built on the system `ssh` binary
//!
//! Password authentication goes through `sshpass -e`, which reads the
//! password from the `SSHPASS` environment variable so it never shows up in
//! a process listing. Completion is observed by awaiting the child process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::authn::cipher::CredentialCipher;
use crate::errors::BackendError;
use crate::models::server::ServerProfile;
use crate::storage::settings::SshSettings;

/// Exit status reserved by `ssh` for its own failures
const SSH_FAILURE: i32 = 255;

/// Connection parameters of a target host
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish()
    }
}

impl SshTarget {
    /// Target of a server profile, with its password decrypted
    pub fn from_profile(
        server: &ServerProfile,
        cipher: &CredentialCipher,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            host: server.host.clone(),
            port: server.port,
            user: server.username.clone(),
            password: cipher.decrypt(&server.password)?,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes shell commands on a remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command`, feeding `stdin` to it, and wait for completion
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<RemoteOutput, BackendError>;
}

/// [`RemoteShell`] over the OpenSSH client
pub struct SshClient {
    settings: SshSettings,
}

impl SshClient {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn command(&self, target: &SshTarget, remote_command: &str) -> Command {
        let password = target.password.expose_secret();
        let mut cmd = if password.is_empty() {
            let mut cmd = Command::new(&self.settings.ssh_binary);
            cmd.arg("-o").arg("BatchMode=yes");
            cmd
        } else {
            let mut cmd = Command::new(&self.settings.sshpass_binary);
            cmd.arg("-e")
                .arg(&self.settings.ssh_binary)
                .env("SSHPASS", password)
                .arg("-o")
                .arg("PubkeyAuthentication=no")
                .arg("-o")
                .arg("NumberOfPasswordPrompts=1");
            cmd
        };
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.settings.connect_timeout_secs))
            .arg("-p")
            .arg(target.port.to_string())
            .arg(target.destination())
            .arg("--")
            .arg(remote_command);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshClient {
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<RemoteOutput, BackendError> {
        let mut cmd = self.command(target, command);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!("ssh {}:{} running remote command", target.host, target.port);
        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Transport(format!("failed to start ssh: {}", e)))?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&data).await {
                    warn!("Failed to write remote stdin: {}", e);
                }
            });
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BackendError::Timeout(format!(
                    "remote command on {} exceeded {}s",
                    target.host,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let result = RemoteOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if result.exit_code == SSH_FAILURE {
            return Err(BackendError::Transport(format!(
                "ssh to {}:{} failed: {}",
                target.host,
                target.port,
                result.stderr.trim()
            )));
        }
        Ok(result)
    }
}
