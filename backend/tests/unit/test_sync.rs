//! Application and repository rechecks against a local bare remote

use std::sync::Arc;

use infraflow::app::state::AppState;
use infraflow::errors::BackendError;
use infraflow::models::application::{AppStatus, Application, SyncStrategy};
use infraflow::models::repository::{RepositoryConnection, RepositoryStatus};
use infraflow::storage::registry::Registries;
use infraflow::storage::settings::Settings;
use infraflow::workers::poller;

use crate::support::{cipher, git_settings, leftover_entries, FakeSandbox, FakeShell, RemoteRepo};

struct Fixture {
    _remote: RemoteRepo,
    workspaces: tempfile::TempDir,
    state: AppState,
}

fn application(name: &str, branch: &str, strategy: SyncStrategy) -> Application {
    let mut app = Application::new(name);
    app.repo_name = Some("infra-repo".to_string());
    app.branch = Some(branch.to_string());
    app.path = Some("infra".to_string());
    app.sync_strategy = strategy;
    app
}

async fn fixture() -> Fixture {
    let remote = RemoteRepo::seeded(&[("infra/main.tf", "# tf\n")]);
    let workspaces = tempfile::tempdir().unwrap();

    let registries = Registries::in_memory();
    registries
        .repositories
        .upsert(remote.connection("infra-repo"))
        .await
        .unwrap();
    registries
        .repositories
        .upsert(RepositoryConnection::new(
            "gone",
            workspaces.path().join("missing.git").to_str().unwrap(),
            "main",
        ))
        .await
        .unwrap();
    for app in [
        application("web", "main", SyncStrategy::Auto),
        application("docs", "main", SyncStrategy::Manual),
        application("broken", "no-such-branch", SyncStrategy::Auto),
    ] {
        registries.applications.upsert(app).await.unwrap();
    }

    let state = AppState::with_components(
        Settings {
            git: git_settings(workspaces.path()),
            ..Default::default()
        },
        registries,
        cipher(),
        Arc::new(FakeShell::new(0)),
        Arc::new(FakeSandbox::default()),
    )
    .unwrap();

    Fixture {
        _remote: remote,
        workspaces,
        state,
    }
}

async fn status_of(f: &Fixture, name: &str) -> AppStatus {
    f.state.registries.applications.get(name).await.unwrap().status
}

#[tokio::test]
async fn test_sync_auto_apps_records_and_publishes() {
    let f = fixture().await;
    let mut updates = f.state.notifier.subscribe();

    f.state.sync.sync_auto_apps().await;

    assert_eq!(status_of(&f, "web").await, AppStatus::Synced);
    assert_eq!(status_of(&f, "broken").await, AppStatus::Error);
    assert_eq!(status_of(&f, "docs").await, AppStatus::NotSynced);

    let mut published = vec![
        updates.try_recv().unwrap().name,
        updates.try_recv().unwrap().name,
    ];
    published.sort();
    assert_eq!(published, vec!["broken".to_string(), "web".to_string()]);
    assert!(updates.try_recv().is_err());
    assert_eq!(leftover_entries(f.workspaces.path()), 0);
}

#[tokio::test]
async fn test_recheck_application_rules() {
    let f = fixture().await;

    let status = f.state.sync.recheck_application("docs").await.unwrap();
    assert_eq!(status, AppStatus::Synced);

    f.state
        .registries
        .applications
        .update("docs", |app| app.repo_name = None)
        .await
        .unwrap();
    let status = f.state.sync.recheck_application("docs").await.unwrap();
    assert_eq!(status, AppStatus::Error);

    let missing = f.state.sync.recheck_application("missing").await;
    assert!(matches!(missing, Err(BackendError::NotFound(_))));
}

#[tokio::test]
async fn test_recheck_repository_records_status() {
    let f = fixture().await;

    let status = f.state.sync.recheck_repository("infra-repo").await.unwrap();
    assert_eq!(status, RepositoryStatus::Successful);
    let repo = f.state.registries.repositories.get("infra-repo").await.unwrap();
    assert_eq!(repo.status, RepositoryStatus::Successful);

    let status = f.state.sync.recheck_repository("gone").await.unwrap();
    assert_eq!(status, RepositoryStatus::Error);
    let repo = f.state.registries.repositories.get("gone").await.unwrap();
    assert_eq!(repo.status, RepositoryStatus::Error);
}

#[tokio::test]
async fn test_poller_runs_auto_sync() {
    let f = fixture().await;
    let (tx, mut rx) = tokio::sync::broadcast::channel::<()>(1);
    let options = poller::Options {
        interval: std::time::Duration::from_millis(10),
        initial_delay: std::time::Duration::from_millis(0),
    };
    let sync = f.state.sync.clone();
    let handle = tokio::spawn(async move {
        poller::run(
            &options,
            sync,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = rx.recv().await;
            }),
        )
        .await;
    });

    for _ in 0..200 {
        if status_of(&f, "web").await == AppStatus::Synced {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(status_of(&f, "web").await, AppStatus::Synced);
}
