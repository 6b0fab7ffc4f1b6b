//! Deployment orchestration
//!
//! A deployment generates the artifacts for an application, commits them to
//! the application's branch, uploads the scripts to the target server and
//! runs `deploy.sh` there. When the upload or the remote run fails, the
//! artifact commit is reverted before the failure is returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::authn::cipher::CredentialCipher;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::scripts::{
    ArtifactContext, DetectedKinds, GeneratedArtifacts, DEPLOY_SCRIPT, ROLLBACK_SCRIPT,
};
use crate::errors::BackendError;
use crate::git::store::GitContentStore;
use crate::models::application::{AppStatus, Application};
use crate::models::file_node::FileNode;
use crate::models::repository::RepositoryConnection;
use crate::notify::StatusNotifier;
use crate::ssh::client::{RemoteOutput, RemoteShell, SshTarget};
use crate::storage::registry::Registries;
use crate::storage::settings::{CiSettings, SshSettings};
use crate::utils::shell_quote;

/// Outcome of a successful deployment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub application: String,

    /// Artifact commit, `None` when the branch already held identical artifacts
    pub commit: Option<String>,

    pub state: DeploymentState,

    pub exit_code: i32,

    /// Combined output of `deploy.sh`
    pub output: String,

    /// Digest of the generated artifacts
    pub artifacts: String,
}

/// Runs deployments, one at a time per application
pub struct DeploymentOrchestrator {
    registries: Registries,
    store: Arc<GitContentStore>,
    shell: Arc<dyn RemoteShell>,
    cipher: Arc<CredentialCipher>,
    notifier: Arc<dyn StatusNotifier>,
    ssh: SshSettings,
    workflow_file: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        registries: Registries,
        store: Arc<GitContentStore>,
        shell: Arc<dyn RemoteShell>,
        cipher: Arc<CredentialCipher>,
        notifier: Arc<dyn StatusNotifier>,
        ssh: SshSettings,
        ci: &CiSettings,
    ) -> Self {
        Self {
            registries,
            store,
            shell,
            cipher,
            notifier,
            ssh,
            workflow_file: ci.workflow_file.clone(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Deploy an application to its server
    #[instrument(skip(self))]
    pub async fn deploy(&self, name: &str) -> Result<DeploymentReport, BackendError> {
        let lock = self.lock_for(name).await;
        let result = {
            let _guard = lock.lock().await;
            self.deploy_locked(name).await
        };
        drop(lock);
        self.release_lock(name).await;
        result
    }

    /// Applications with a deployment running or waiting for one
    pub async fn active_deployments(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn deploy_locked(&self, name: &str) -> Result<DeploymentReport, BackendError> {
        let mut fsm = DeploymentFsm::new();
        let app = self.registries.applications.get(name).await?;
        let result = self.run(&app, &mut fsm).await;

        let status = match &result {
            Ok(_) => AppStatus::Synced,
            Err(_) => AppStatus::Error,
        };
        self.set_status(name, status).await;

        match &result {
            Ok(report) => info!(
                "Deployed {} ({})",
                name,
                report.commit.as_deref().unwrap_or("artifacts unchanged")
            ),
            Err(e) => error!("Deployment of {} ended in {:?}: {}", name, fsm.state(), e),
        }
        result
    }

    async fn run(
        &self,
        app: &Application,
        fsm: &mut DeploymentFsm,
    ) -> Result<DeploymentReport, BackendError> {
        let target = match self.resolve(app).await {
            Ok(target) => target,
            Err(e) => {
                transition(fsm, DeploymentEvent::Fail(e.to_string()))?;
                return Err(e);
            }
        };

        let artifacts = match self.generate_and_push(app, &target).await {
            Ok(pushed) => pushed,
            Err(e) => {
                transition(fsm, DeploymentEvent::Fail(e.to_string()))?;
                return Err(e);
            }
        };
        transition(fsm, DeploymentEvent::Pushed(artifacts.commit.clone()))?;

        transition(fsm, DeploymentEvent::Deploy)?;
        let outcome = match self.upload(&target, &artifacts.generated).await {
            Ok(()) => self.execute(&target).await,
            Err(e) => Err(e),
        };

        let failure = match outcome {
            Ok(output) if output.success() => {
                transition(fsm, DeploymentEvent::DeploySuccess)?;
                return Ok(DeploymentReport {
                    application: app.name.clone(),
                    commit: artifacts.commit,
                    state: fsm.state(),
                    exit_code: output.exit_code,
                    output: combined(&output),
                    artifacts: artifacts.generated.digest(),
                });
            }
            Ok(output) => {
                warn!("{} failed on {}:\n{}", DEPLOY_SCRIPT, target.ssh.host, combined(&output));
                BackendError::DeployError(format!(
                    "{} exited with code {}",
                    DEPLOY_SCRIPT, output.exit_code
                ))
            }
            Err(e) => e,
        };

        Err(self
            .compensate(&target, artifacts.commit.as_deref(), failure, fsm)
            .await)
    }

    /// Look up the repository and server and decrypt the server credentials
    async fn resolve(&self, app: &Application) -> Result<Target, BackendError> {
        let deploy = app.deploy_target()?;
        let repo = self.registries.repositories.get(deploy.repo_name).await?;
        let server = self.registries.servers.get(deploy.server_name).await?;
        let ssh = SshTarget::from_profile(&server, &self.cipher)?;
        let context = ArtifactContext::new(app, deploy.branch, &server);
        Ok(Target {
            repo,
            branch: deploy.branch.to_string(),
            path: deploy.path.to_string(),
            ssh,
            context,
        })
    }

    async fn generate_and_push(
        &self,
        app: &Application,
        target: &Target,
    ) -> Result<PushedArtifacts, BackendError> {
        let tree = self
            .store
            .list_files(&target.repo, &target.branch, &target.path)
            .await?;
        let paths = FileNode::folder("", tree).file_paths();
        let kinds = DetectedKinds::from_paths(&paths);
        info!("Detected template kinds for {}: {:?}", app.name, kinds);

        let generated = GeneratedArtifacts::generate(&target.context, kinds);
        let files = generated.files(&target.path, &self.workflow_file);
        let message = format!("Update deployment artifacts for {}", app.name);
        let commit = self
            .store
            .push_files(&target.repo, &target.branch, &files, &message)
            .await?;
        Ok(PushedArtifacts { generated, commit })
    }

    /// Upload both scripts, each over its own remote command
    async fn upload(
        &self,
        target: &Target,
        artifacts: &GeneratedArtifacts,
    ) -> Result<(), BackendError> {
        let dir = &target.context.app_dir;
        for (name, content) in [
            (DEPLOY_SCRIPT, &artifacts.deploy_sh),
            (ROLLBACK_SCRIPT, &artifacts.rollback_sh),
        ] {
            let file = shell_quote(&format!("{}/{}", dir, name));
            let command = format!(
                "mkdir -p {} && cat > {} && chmod +x {}",
                shell_quote(dir),
                file,
                file
            );
            let output = self
                .shell
                .exec(
                    &target.ssh,
                    &command,
                    Some(content.as_bytes().to_vec()),
                    self.command_timeout(),
                )
                .await?;
            if !output.success() {
                return Err(BackendError::Transport(format!(
                    "failed to upload {} to {}: {}",
                    name,
                    target.ssh.host,
                    output.stderr.trim()
                )));
            }
        }
        info!("Uploaded scripts to {}:{}", target.ssh.host, dir);
        Ok(())
    }

    /// Run `deploy.sh`, passing the become password on stdin
    async fn execute(&self, target: &Target) -> Result<RemoteOutput, BackendError> {
        let command = format!(
            "cd {} || exit 1; IFS= read -r BECOME_PASSWORD; export BECOME_PASSWORD; exec bash ./{}",
            shell_quote(&target.context.app_dir),
            DEPLOY_SCRIPT
        );
        let stdin = format!("{}\n", target.ssh.password.expose_secret()).into_bytes();
        info!("Running {} on {}", DEPLOY_SCRIPT, target.ssh.host);
        self.shell
            .exec(
                &target.ssh,
                &command,
                Some(stdin),
                Duration::from_secs(self.ssh.deploy_timeout_secs),
            )
            .await
    }

    /// Revert the artifact commit and wrap the failure returned to the caller
    async fn compensate(
        &self,
        target: &Target,
        commit: Option<&str>,
        failure: BackendError,
        fsm: &mut DeploymentFsm,
    ) -> BackendError {
        let Some(commit) = commit else {
            record(fsm, DeploymentEvent::Fail(failure.to_string()));
            return compensated(failure, "no artifact commit to revert".to_string());
        };

        match self
            .store
            .revert_last_commit(&target.repo, &target.branch, Some(commit))
            .await
        {
            Ok(revert) => {
                warn!("Reverted artifact commit {} with {}", commit, revert);
                record(fsm, DeploymentEvent::RolledBack(failure.to_string()));
                compensated(failure, format!("reverted {}", commit))
            }
            Err(e) => {
                error!("Failed to revert artifact commit {}: {}", commit, e);
                let compensation = format!("revert of {} failed: {}", commit, e);
                record(
                    fsm,
                    DeploymentEvent::Fail(format!("{}; {}", failure, compensation)),
                );
                compensated(failure, compensation)
            }
        }
    }

    async fn set_status(&self, name: &str, status: AppStatus) {
        match self
            .registries
            .applications
            .update(name, |app| app.status = status)
            .await
        {
            Ok(app) => self.notifier.publish(&app).await,
            Err(e) => warn!("Failed to record status of {}: {}", name, e),
        }
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Forget the lock of `name` once no caller holds or waits on it
    async fn release_lock(&self, name: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.command_timeout_secs)
    }
}

struct Target {
    repo: RepositoryConnection,
    branch: String,
    path: String,
    ssh: SshTarget,
    context: ArtifactContext,
}

struct PushedArtifacts {
    generated: GeneratedArtifacts,
    commit: Option<String>,
}

fn transition(fsm: &mut DeploymentFsm, event: DeploymentEvent) -> Result<(), BackendError> {
    fsm.process(event).map_err(BackendError::Internal)
}

/// Apply a transition on a path that is already failing
fn record(fsm: &mut DeploymentFsm, event: DeploymentEvent) {
    if let Err(e) = fsm.process(event) {
        error!("{}", e);
    }
}

fn compensated(cause: BackendError, compensation: String) -> BackendError {
    BackendError::Compensated {
        cause: Box::new(cause),
        compensation,
    }
}

fn combined(output: &RemoteOutput) -> String {
    match (output.stdout.is_empty(), output.stderr.is_empty()) {
        (_, true) => output.stdout.clone(),
        (true, false) => output.stderr.clone(),
        (false, false) => format!("{}\n{}", output.stdout, output.stderr),
    }
}
