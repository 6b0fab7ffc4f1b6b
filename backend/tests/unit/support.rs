//! Shared fixtures

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use infraflow::authn::cipher::CredentialCipher;
use infraflow::errors::BackendError;
use infraflow::models::repository::RepositoryConnection;
use infraflow::ssh::client::{RemoteOutput, RemoteShell, SshTarget};
use infraflow::storage::settings::{GitSettings, ValidatorSettings};
use infraflow::validate::sandbox::{Sandbox, SandboxJob, SandboxOutcome};

/// Run git in `dir`, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// A bare repository seeded with one commit on `main`
pub struct RemoteRepo {
    _root: TempDir,
    pub bare: PathBuf,
}

impl RemoteRepo {
    pub fn seeded(files: &[(&str, &str)]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let bare = root.path().join("remote.git");
        let seed = root.path().join("seed");

        git(root.path(), &["init", "-q", "--bare", bare.to_str().unwrap()]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(root.path(), &["init", "-q", seed.to_str().unwrap()]);
        git(&seed, &["checkout", "-q", "-b", "main"]);

        std::fs::write(seed.join("README.md"), "# infra\n").unwrap();
        for (path, content) in files {
            let target = seed.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "Initial commit"]);
        git(&seed, &["push", "-q", bare.to_str().unwrap(), "HEAD:refs/heads/main"]);

        Self { _root: root, bare }
    }

    pub fn connection(&self, name: &str) -> RepositoryConnection {
        RepositoryConnection::new(name, self.bare.to_str().unwrap(), "main")
    }

    /// Commit subjects of `branch`, newest first
    pub fn subjects(&self, branch: &str) -> Vec<String> {
        git(&self.bare, &["log", "--format=%s", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn head(&self, branch: &str) -> String {
        git(&self.bare, &["rev-parse", branch]).trim().to_string()
    }

    /// Content of `path` at the tip of `branch`, if present
    pub fn show(&self, branch: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.bare)
            .arg("show")
            .arg(format!("{}:{}", branch, path))
            .output()
            .unwrap();
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn branches(&self) -> Vec<String> {
        git(&self.bare, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub fn git_settings(workspace_root: &Path) -> GitSettings {
    GitSettings {
        workspace_root: Some(workspace_root.to_path_buf()),
        ..Default::default()
    }
}

pub fn validator_settings(workspace_root: &Path) -> ValidatorSettings {
    ValidatorSettings {
        workspace_root: Some(workspace_root.to_path_buf()),
        ..Default::default()
    }
}

pub fn cipher() -> Arc<CredentialCipher> {
    Arc::new(CredentialCipher::generate())
}

/// Number of entries left in a workspace root
pub fn leftover_entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

/// A recorded remote command
#[derive(Debug, Clone)]
pub struct ShellCall {
    pub host: String,
    pub command: String,
    pub stdin: Option<Vec<u8>>,
}

/// Remote shell answering every command with exit 0 except `deploy.sh`
///
/// Uploads can be made to exit non-zero and `deploy.sh` can be made to
/// time out instead of exiting.
pub struct FakeShell {
    deploy_exit: AtomicI32,
    upload_exit: i32,
    deploy_times_out: bool,
    pub calls: Mutex<Vec<ShellCall>>,
}

impl FakeShell {
    pub fn new(deploy_exit: i32) -> Self {
        Self {
            deploy_exit: AtomicI32::new(deploy_exit),
            upload_exit: 0,
            deploy_times_out: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every script upload exits with 1
    pub fn failing_upload() -> Self {
        Self {
            upload_exit: 1,
            ..Self::new(0)
        }
    }

    /// `deploy.sh` never completes within its timeout
    pub fn timing_out() -> Self {
        Self {
            deploy_times_out: true,
            ..Self::new(0)
        }
    }

    pub fn set_deploy_exit(&self, code: i32) {
        self.deploy_exit.store(code, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        stdin: Option<Vec<u8>>,
        _timeout: Duration,
    ) -> Result<RemoteOutput, BackendError> {
        self.calls.lock().unwrap().push(ShellCall {
            host: target.host.clone(),
            command: command.to_string(),
            stdin,
        });
        let (exit_code, stderr) = if command.contains("./deploy.sh") {
            if self.deploy_times_out {
                return Err(BackendError::Timeout(format!("'{}' on {}", command, target.host)));
            }
            (self.deploy_exit.load(Ordering::SeqCst), "terraform apply failed\n")
        } else {
            (self.upload_exit, "No space left on device\n")
        };
        Ok(RemoteOutput {
            exit_code,
            stdout: "ok\n".to_string(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                stderr.to_string()
            },
        })
    }
}

/// Sandbox replaying queued outcomes, then succeeding
#[derive(Default)]
pub struct FakeSandbox {
    outcomes: Mutex<VecDeque<SandboxOutcome>>,
    pub jobs: Mutex<Vec<SandboxJob>>,
}

impl FakeSandbox {
    pub fn with_outcomes(outcomes: Vec<SandboxOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<SandboxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, BackendError> {
        self.jobs.lock().unwrap().push(job);
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SandboxOutcome::Exited {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
    }
}

pub fn exited(code: i32, stdout: &str) -> SandboxOutcome {
    SandboxOutcome::Exited {
        code,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}
