//! Application and repository status rechecks
//!
//! Applications with the `auto` sync strategy are rechecked periodically:
//! a fresh clone of their branch is compared against the ref the remote
//! advertises, and the outcome is recorded and published.

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::BackendError;
use crate::git::store::GitContentStore;
use crate::models::application::{AppStatus, Application, SyncStrategy};
use crate::models::repository::RepositoryStatus;
use crate::notify::StatusNotifier;
use crate::storage::registry::Registries;

pub struct SyncChecker {
    registries: Registries,
    store: Arc<GitContentStore>,
    notifier: Arc<dyn StatusNotifier>,
}

impl SyncChecker {
    pub fn new(
        registries: Registries,
        store: Arc<GitContentStore>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            registries,
            store,
            notifier,
        }
    }

    /// Compare an application's branch with its remote and record the status
    pub async fn recheck_application(&self, name: &str) -> Result<AppStatus, BackendError> {
        let app = self.registries.applications.get(name).await?;
        let status = status_of(name, self.branch_in_sync(&app).await);

        let app = self
            .registries
            .applications
            .update(name, |app| app.status = status)
            .await?;
        self.notifier.publish(&app).await;
        Ok(status)
    }

    /// Check a repository connection and record the status
    pub async fn recheck_repository(&self, name: &str) -> Result<RepositoryStatus, BackendError> {
        let repo = self.registries.repositories.get(name).await?;
        let status = self.store.check_connection(&repo).await;
        self.registries
            .repositories
            .update(name, |repo| repo.status = status)
            .await?;
        Ok(status)
    }

    /// Recheck every application that follows its branch automatically
    pub async fn sync_auto_apps(&self) {
        let apps = self.registries.applications.list().await;
        for app in apps.iter().filter(|a| a.sync_strategy == SyncStrategy::Auto) {
            match self.recheck_application(&app.name).await {
                Ok(status) => info!("Auto-sync of {}: {:?}", app.name, status),
                Err(e) => warn!("Auto-sync of {} failed: {}", app.name, e),
            }
        }
    }

    async fn branch_in_sync(&self, app: &Application) -> Result<bool, BackendError> {
        let missing = |field: &str| {
            BackendError::InvalidParameter(format!(
                "application '{}' has no {} configured",
                app.name, field
            ))
        };
        let repo_name = app
            .repo_name
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| missing("repository"))?;
        let branch = app
            .branch
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| missing("branch"))?;

        let repo = self.registries.repositories.get(repo_name).await?;
        self.store.head_matches_remote(&repo, branch).await
    }
}

fn status_of(name: &str, in_sync: Result<bool, BackendError>) -> AppStatus {
    match in_sync {
        Ok(true) => AppStatus::Synced,
        Ok(false) => AppStatus::OutOfSync,
        Err(e) => {
            warn!("Status check of {} failed: {}", name, e);
            AppStatus::Error
        }
    }
}
