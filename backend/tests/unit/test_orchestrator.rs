//! Deployment orchestration with a fake remote shell

use std::sync::Arc;

use infraflow::app::state::AppState;
use infraflow::deploy::fsm::DeploymentState;
use infraflow::errors::BackendError;
use infraflow::models::application::{AppStatus, Application};
use infraflow::models::server::ServerProfile;
use infraflow::storage::registry::Registries;
use infraflow::storage::settings::Settings;

use crate::support::{cipher, git_settings, leftover_entries, FakeSandbox, FakeShell, RemoteRepo};

/// The artifact commit and its revert landed on top of `before` commits
fn assert_artifacts_reverted(f: &Fixture, before: usize) {
    let after = f.remote.subjects("main");
    assert_eq!(after.len(), before + 2);
    assert!(after[0].starts_with("Revert"));
    assert_eq!(after[1], "Update deployment artifacts for web");
    assert!(f.remote.show("main", "infra/deploy.sh").is_none());
    assert!(f.remote.show("main", ".github/workflows/deploy.yml").is_none());
}

struct Fixture {
    remote: RemoteRepo,
    workspaces: tempfile::TempDir,
    shell: Arc<FakeShell>,
    state: AppState,
}

async fn fixture(shell: FakeShell) -> Fixture {
    let remote = RemoteRepo::seeded(&[
        ("infra/main.tf", "resource \"null_resource\" \"x\" {}\n"),
        ("infra/setup.sh", "echo setup\n"),
    ]);
    let workspaces = tempfile::tempdir().unwrap();
    let shell = Arc::new(shell);
    let cipher = cipher();

    let settings = Settings {
        git: git_settings(workspaces.path()),
        ..Default::default()
    };
    let registries = Registries::in_memory();
    registries
        .repositories
        .upsert(remote.connection("infra-repo"))
        .await
        .unwrap();
    let password = cipher.encrypt("s3cret").unwrap();
    registries
        .servers
        .upsert(ServerProfile::new("prod", "10.0.0.5", 22, "ops", &password))
        .await
        .unwrap();
    let mut app = Application::new("web");
    app.repo_name = Some("infra-repo".to_string());
    app.branch = Some("main".to_string());
    app.path = Some("infra".to_string());
    app.server_name = Some("prod".to_string());
    registries.applications.upsert(app).await.unwrap();

    let state = AppState::with_components(
        settings,
        registries,
        cipher,
        shell.clone(),
        Arc::new(FakeSandbox::default()),
    )
    .unwrap();

    Fixture {
        remote,
        workspaces,
        shell,
        state,
    }
}

#[tokio::test]
async fn test_failed_remote_run_reverts_artifact_commit() {
    let f = fixture(FakeShell::new(2)).await;
    let mut updates = f.state.notifier.subscribe();
    let before = f.remote.subjects("main");

    let result = f.state.orchestrator.deploy("web").await;

    match result {
        Err(BackendError::Compensated { cause, compensation }) => {
            match *cause {
                BackendError::DeployError(message) => {
                    assert!(message.contains("exited with code 2"), "{}", message)
                }
                other => panic!("unexpected cause: {:?}", other),
            }
            assert!(compensation.starts_with("reverted "), "{}", compensation);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert_artifacts_reverted(&f, before.len());

    let app = f.state.registries.applications.get("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Error);
    assert_eq!(updates.try_recv().unwrap().status, AppStatus::Error);
    assert_eq!(leftover_entries(f.workspaces.path()), 0);
}

#[tokio::test]
async fn test_successful_deploy_pushes_and_runs_scripts() {
    let f = fixture(FakeShell::new(0)).await;

    let report = f.state.orchestrator.deploy("web").await.unwrap();

    assert_eq!(report.state, DeploymentState::Succeeded);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.commit.as_deref(), Some(f.remote.head("main").as_str()));

    let deploy_sh = f.remote.show("main", "infra/deploy.sh").unwrap();
    assert!(deploy_sh.contains("APP_DIR='/home/ops/apps/web'"));
    assert!(deploy_sh.contains("terraform apply"));
    assert!(deploy_sh.contains("bash \"$script\""));
    assert!(!deploy_sh.contains("ansible-playbook"));
    assert!(!deploy_sh.contains("s3cret"));
    assert!(f.remote.show("main", "infra/rollback.sh").is_some());
    let workflow = f.remote.show("main", ".github/workflows/deploy.yml").unwrap();
    assert!(workflow.contains("- \"main\""));

    let calls = f.shell.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.host == "10.0.0.5"));
    assert!(calls[0].command.contains("cat > '/home/ops/apps/web/deploy.sh'"));
    assert_eq!(calls[0].stdin.as_deref(), Some(deploy_sh.as_bytes()));
    assert!(calls[1].command.contains("cat > '/home/ops/apps/web/rollback.sh'"));
    assert!(calls[2].command.contains("exec bash ./deploy.sh"));
    assert!(!calls[2].command.contains("s3cret"));
    assert_eq!(calls[2].stdin.as_deref(), Some(&b"s3cret\n"[..]));

    let app = f.state.registries.applications.get("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Synced);

    let again = f.state.orchestrator.deploy("web").await.unwrap();
    assert!(again.commit.is_none());
    assert_eq!(again.artifacts, report.artifacts);
}

#[tokio::test]
async fn test_deploy_requires_known_collaborators() {
    let f = fixture(FakeShell::new(0)).await;

    let result = f.state.orchestrator.deploy("missing").await;
    assert!(matches!(result, Err(BackendError::NotFound(_))));

    f.state
        .registries
        .applications
        .update("web", |app| app.server_name = Some("staging".to_string()))
        .await
        .unwrap();
    let result = f.state.orchestrator.deploy("web").await;
    assert!(matches!(result, Err(BackendError::NotFound(_))));

    f.state
        .registries
        .applications
        .update("web", |app| app.server_name = None)
        .await
        .unwrap();
    let result = f.state.orchestrator.deploy("web").await;
    assert!(matches!(result, Err(BackendError::InvalidParameter(_))));

    assert!(f.shell.calls().is_empty());
    assert_eq!(f.remote.subjects("main").len(), 1);
}

#[tokio::test]
async fn test_failed_upload_reverts_without_running_deploy() {
    let f = fixture(FakeShell::failing_upload()).await;
    let before = f.remote.subjects("main").len();

    let result = f.state.orchestrator.deploy("web").await;

    match result {
        Err(BackendError::Compensated { cause, .. }) => {
            assert!(matches!(*cause, BackendError::Transport(_)), "{:?}", cause)
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_artifacts_reverted(&f, before);

    let calls = f.shell.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].command.contains("./deploy.sh"));

    let app = f.state.registries.applications.get("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Error);
}

#[tokio::test]
async fn test_remote_timeout_reverts_and_keeps_error_kind() {
    let f = fixture(FakeShell::timing_out()).await;
    let before = f.remote.subjects("main").len();

    let result = f.state.orchestrator.deploy("web").await;

    match result {
        Err(BackendError::Compensated { cause, compensation }) => {
            assert!(matches!(*cause, BackendError::Timeout(_)), "{:?}", cause);
            assert!(compensation.starts_with("reverted "), "{}", compensation);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_artifacts_reverted(&f, before);
    assert_eq!(f.shell.calls().len(), 3);
    assert_eq!(leftover_entries(f.workspaces.path()), 0);
}

#[tokio::test]
async fn test_failure_with_unchanged_artifacts_reverts_nothing() {
    let f = fixture(FakeShell::new(0)).await;
    f.state.orchestrator.deploy("web").await.unwrap();
    let deployed = f.remote.subjects("main");

    f.shell.set_deploy_exit(3);
    let result = f.state.orchestrator.deploy("web").await;

    match result {
        Err(BackendError::Compensated { cause, compensation }) => {
            assert!(matches!(*cause, BackendError::DeployError(_)), "{:?}", cause);
            assert_eq!(compensation, "no artifact commit to revert");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(f.remote.subjects("main"), deployed);
    assert!(f.remote.show("main", "infra/deploy.sh").is_some());

    let app = f.state.registries.applications.get("web").await.unwrap();
    assert_eq!(app.status, AppStatus::Error);
}

#[tokio::test]
async fn test_concurrent_deploys_are_serialized_and_release_locks() {
    let f = fixture(FakeShell::new(0)).await;

    let (first, second) = tokio::join!(
        f.state.orchestrator.deploy("web"),
        f.state.orchestrator.deploy("web")
    );
    let commits: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter_map(|report| report.commit)
        .collect();

    assert_eq!(commits.len(), 1);
    assert_eq!(f.remote.subjects("main").len(), 2);
    assert_eq!(f.state.orchestrator.active_deployments().await, 0);
}
