//! GitContentStore against a local bare remote

use std::sync::Arc;

use infraflow::errors::BackendError;
use infraflow::git::store::GitContentStore;
use infraflow::models::file_node::NodeKind;
use infraflow::models::repository::RepositoryStatus;

use crate::support::{cipher, git_settings, leftover_entries, RemoteRepo};

fn store(root: &std::path::Path) -> GitContentStore {
    GitContentStore::new(&git_settings(root), cipher())
}

#[tokio::test]
async fn test_push_file_creates_nested_folders() {
    let remote = RemoteRepo::seeded(&[]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let commit = store
        .push_file(&repo, "main", "envs/prod/network", "main.tf", "# vpc\n", "Add vpc")
        .await
        .unwrap();

    assert_eq!(commit.as_deref(), Some(remote.head("main").as_str()));
    assert_eq!(
        remote.show("main", "envs/prod/network/main.tf").as_deref(),
        Some("# vpc\n")
    );
    assert_eq!(remote.subjects("main")[0], "Add vpc");
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_push_unchanged_content_is_noop() {
    let remote = RemoteRepo::seeded(&[("app/run.sh", "echo hi\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let commit = store
        .push_file(&repo, "main", "app", "run.sh", "echo hi\n", "Same content")
        .await
        .unwrap();

    assert!(commit.is_none());
    assert_eq!(remote.subjects("main").len(), 1);
}

#[tokio::test]
async fn test_read_entry_file_folder_and_missing() {
    let remote = RemoteRepo::seeded(&[("app/main.tf", "# tf\n"), ("app/roles/site.yml", "- hosts: all\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let file = store.read_entry(&repo, "main", "app/main.tf").await;
    assert_eq!(file.kind, NodeKind::File);
    assert_eq!(file.content.as_deref(), Some("# tf\n"));

    let folder = store.read_entry(&repo, "main", "app").await;
    assert_eq!(folder.kind, NodeKind::Folder);
    assert_eq!(folder.file_paths(), vec!["main.tf", "roles/site.yml"]);

    let missing = store.read_entry(&repo, "main", "nope").await;
    assert_eq!(missing.kind, NodeKind::Missing);

    let error = store.read_entry(&repo, "no-such-branch", "app").await;
    assert_eq!(error.kind, NodeKind::Error);

    assert!(matches!(
        store.read_file(&repo, "main", "app").await,
        Err(BackendError::NotFound(_))
    ));
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_revert_commit_with_unknown_hash() {
    let remote = RemoteRepo::seeded(&[]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let result = store
        .revert_commit(&repo, "main", "0123456789abcdef0123456789abcdef01234567", "Revert")
        .await;
    assert!(matches!(result, Err(BackendError::CommitNotFound(_))));

    let result = store.revert_commit(&repo, "main", "not-a-ref", "Revert").await;
    assert!(matches!(result, Err(BackendError::CommitNotFound(_))));
    assert_eq!(remote.subjects("main").len(), 1);
}

#[tokio::test]
async fn test_revert_commit_restores_content() {
    let remote = RemoteRepo::seeded(&[("app/run.sh", "echo one\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let commit = store
        .push_file(&repo, "main", "app", "run.sh", "echo two\n", "Change script")
        .await
        .unwrap()
        .unwrap();
    store
        .revert_commit(&repo, "main", &commit, "Undo change")
        .await
        .unwrap();

    assert_eq!(remote.show("main", "app/run.sh").as_deref(), Some("echo one\n"));
    assert_eq!(remote.subjects("main")[0], "Undo change");
}

#[tokio::test]
async fn test_delete_branch_rules() {
    let remote = RemoteRepo::seeded(&[]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let result = store.delete_branch(&repo, "main").await;
    assert!(matches!(result, Err(BackendError::LastBranch(_))));

    store.create_branch(&repo, "feature", "main").await.unwrap();
    assert_eq!(remote.branches(), vec!["feature", "main"]);

    let fallback = store.delete_branch(&repo, "feature").await.unwrap();
    assert_eq!(fallback, "main");
    assert_eq!(remote.branches(), vec!["main"]);

    let result = store.delete_branch(&repo, "feature").await;
    assert!(matches!(result, Err(BackendError::NotFound(_))));
}

#[tokio::test]
async fn test_branch_listing_and_connection() {
    let remote = RemoteRepo::seeded(&[]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    assert!(store.branch_exists(&repo, "main").await.unwrap());
    assert!(!store.branch_exists(&repo, "develop").await.unwrap());
    assert_eq!(store.list_branches(&repo).await.unwrap(), vec!["main"]);
    assert_eq!(store.check_connection(&repo).await, RepositoryStatus::Successful);

    let mut missing = remote.connection("gone");
    missing.repo_url = workspaces.path().join("absent.git").display().to_string();
    assert_eq!(store.check_connection(&missing).await, RepositoryStatus::Error);
}

#[tokio::test]
async fn test_rename_and_delete_paths() {
    let remote = RemoteRepo::seeded(&[("app/old.sh", "echo\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    store
        .rename_path(&repo, "main", "app/old.sh", "app/new.sh", "Rename")
        .await
        .unwrap();
    assert!(remote.show("main", "app/old.sh").is_none());
    assert_eq!(remote.show("main", "app/new.sh").as_deref(), Some("echo\n"));

    store
        .delete_path(&repo, "main", "app", "Remove app")
        .await
        .unwrap();
    assert!(remote.show("main", "app/new.sh").is_none());
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_concurrent_operations_leave_no_workspaces() {
    let remote = RemoteRepo::seeded(&[("app/main.tf", "# tf\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = Arc::new(store(workspaces.path()));
    let repo = remote.connection("infra");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let repo = repo.clone();
        tasks.push(tokio::spawn(async move {
            match i % 4 {
                0 => store.list_files(&repo, "main", "app").await.map(|_| ()),
                1 => store.read_file(&repo, "main", "app/main.tf").await.map(|_| ()),
                2 => store.read_file(&repo, "main", "missing.tf").await.map(|_| ()),
                _ => store
                    .push_file(&repo, "main", "notes", &format!("{}.md", i), "x\n", "Note")
                    .await
                    .map(|_| ()),
            }
        }));
    }
    let results = futures::future::join_all(tasks).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_folders_and_path_checks() {
    let remote = RemoteRepo::seeded(&[("envs/prod/main.tf", "# prod\n"), ("envs/dev/main.tf", "# dev\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    assert!(store.path_exists(&repo, "main", "envs/prod").await.unwrap());
    assert!(!store.path_exists(&repo, "main", "envs/prod/main.tf").await.unwrap());
    assert!(!store.path_exists(&repo, "main", "envs/stage").await.unwrap());
    for blank in ["", ".", "/"] {
        assert!(!store.path_exists(&repo, "main", blank).await.unwrap());
    }

    let folders = store.list_folders(&repo, "main", "envs").await.unwrap();
    assert_eq!(folders, vec!["dev".to_string(), "prod".to_string()]);
    assert!(store.list_folders(&repo, "main", "nowhere").await.unwrap().is_empty());

    let commit = store
        .create_folder(&repo, "main", "envs/stage", "Add stage")
        .await
        .unwrap();
    assert!(commit.is_some());
    assert_eq!(remote.show("main", "envs/stage/.gitkeep").as_deref(), Some(""));
    assert!(store.path_exists(&repo, "main", "envs/stage").await.unwrap());
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_commit_history_and_diff() {
    let remote = RemoteRepo::seeded(&[("app/main.tf", "# v1\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    store
        .push_file(&repo, "main", "app", "main.tf", "# v2\n", "Bump app")
        .await
        .unwrap();
    store
        .push_file(&repo, "main", "docs", "notes.md", "notes\n", "Add notes")
        .await
        .unwrap();

    let commits = store.list_commits(&repo, "main", "app", 0, 10).await.unwrap();
    let messages: Vec<&str> = commits.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(messages, vec!["Bump app", "Initial commit"]);
    assert_eq!(commits[0].hash, remote.head("main~1"));

    let page = store.list_commits(&repo, "main", "", 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].message, "Bump app");

    let diff = store
        .get_commit_diff(&repo, "main", &commits[0].hash, "app")
        .await
        .unwrap();
    assert!(diff.contains("-# v1"));
    assert!(diff.contains("+# v2"));

    let root = store
        .get_commit_diff(&repo, "main", &commits[1].hash, "")
        .await
        .unwrap();
    assert!(root.contains("+# infra"));

    let unknown = store.get_commit_diff(&repo, "main", "deadbeef", "").await;
    assert!(matches!(unknown, Err(BackendError::CommitNotFound(_))));
}

#[tokio::test]
async fn test_download_archive_is_zip() {
    let remote = RemoteRepo::seeded(&[("app/main.tf", "# tf\n")]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let archive = store.download_archive(&repo, "main").await.unwrap();
    assert!(archive.starts_with(b"PK"));
    assert_eq!(leftover_entries(workspaces.path()), 0);
}

#[tokio::test]
async fn test_revert_last_commit_checks_expected_head() {
    let remote = RemoteRepo::seeded(&[]);
    let workspaces = tempfile::tempdir().unwrap();
    let store = store(workspaces.path());
    let repo = remote.connection("infra");

    let files = vec![
        ("app/deploy.sh".to_string(), "#!/bin/bash\n".to_string()),
        ("app/rollback.sh".to_string(), "#!/bin/bash\n".to_string()),
    ];
    let commit = store
        .push_files(&repo, "main", &files, "Add scripts")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.subjects("main").len(), 2);

    let refused = store
        .revert_last_commit(&repo, "main", Some("0000000000000000000000000000000000000000"))
        .await;
    assert!(matches!(refused, Err(BackendError::DeployError(_))));
    assert_eq!(remote.head("main"), commit);

    let reverted = store
        .revert_last_commit(&repo, "main", Some(commit.as_str()))
        .await
        .unwrap();
    assert_eq!(remote.head("main"), reverted);
    assert_eq!(remote.subjects("main").len(), 3);
    assert!(remote.show("main", "app/deploy.sh").is_none());
    assert!(remote.show("main", "app/rollback.sh").is_none());
    assert_eq!(leftover_entries(workspaces.path()), 0);
}
