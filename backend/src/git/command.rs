//! Bounded git subprocess invocation

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::errors::BackendError;
use crate::storage::settings::GitSettings;

/// Captured result of a git invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the git CLI with a fixed identity, no prompts and a timeout
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
    user_name: String,
    user_email: String,
}

impl GitCli {
    pub fn new(settings: &GitSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            timeout: settings.timeout(),
            user_name: settings.committer_name.clone(),
            user_email: settings.committer_email.clone(),
        }
    }

    /// Run git and capture its output whatever the exit status
    ///
    /// Every string in `redact` is masked in the returned output and in errors.
    pub async fn exec(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        redact: &[&str],
    ) -> Result<GitOutput, BackendError> {
        let subcommand = args.first().copied().unwrap_or("git");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c")
            .arg(format!("user.name={}", self.user_name))
            .arg("-c")
            .arg(format!("user.email={}", self.user_email))
            .arg("-c")
            .arg("commit.gpgsign=false")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!("Running git {}", subcommand);
        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Transport(format!("failed to start git: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BackendError::Timeout(format!(
                    "git {} exceeded {}s",
                    subcommand,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| BackendError::Transport(format!("git {} failed: {}", subcommand, e)))?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: scrub(&String::from_utf8_lossy(&output.stdout), redact),
            stderr: scrub(&String::from_utf8_lossy(&output.stderr), redact),
        })
    }

    /// Run git and return stdout, failing on a non-zero exit
    pub async fn run(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        redact: &[&str],
    ) -> Result<String, BackendError> {
        let output = self.exec(cwd, args, redact).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BackendError::Transport(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                output.stderr.trim()
            )))
        }
    }

    /// Run git and return the raw stdout bytes, failing on a non-zero exit
    pub async fn run_bytes(
        &self,
        cwd: &Path,
        args: &[&str],
    ) -> Result<Vec<u8>, BackendError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Transport(format!("failed to start git: {}", e)))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout(format!("git exceeded {}s", self.timeout.as_secs())))?
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !output.status.success() {
            return Err(BackendError::Transport(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Mask every non-empty secret in `text`
pub fn scrub(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret, "***"))
}
