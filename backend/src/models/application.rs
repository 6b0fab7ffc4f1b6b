//! Application models

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::storage::registry::Keyed;

/// How the application follows its branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    Auto,
    #[default]
    Manual,
}

/// Deployment status of an application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    #[default]
    #[serde(rename = "Not Synced")]
    NotSynced,
    Synced,
    #[serde(rename = "Out of Sync")]
    OutOfSync,
    Error,
}

/// A deployable unit: a path inside a repository branch bound to a server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,

    /// Name of the repository connection
    #[serde(default)]
    pub repo_name: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    /// Folder inside the repository holding the templates
    #[serde(default)]
    pub path: Option<String>,

    /// Free-form project tag
    #[serde(default)]
    pub project: Option<String>,

    /// Name of the target server profile
    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub sync_strategy: SyncStrategy,

    #[serde(default)]
    pub status: AppStatus,

    #[serde(default)]
    pub created_at: String,
}

/// The fields a deployment needs, all guaranteed to be present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget<'a> {
    pub repo_name: &'a str,
    pub branch: &'a str,
    pub path: &'a str,
    pub server_name: &'a str,
}

impl Application {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            repo_name: None,
            branch: None,
            path: None,
            project: None,
            server_name: None,
            sync_strategy: SyncStrategy::Manual,
            status: AppStatus::NotSynced,
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Borrow the repository, branch, path and server, failing if any is unset
    pub fn deploy_target(&self) -> Result<DeployTarget<'_>, BackendError> {
        fn required<'a>(
            value: &'a Option<String>,
            field: &str,
            app: &str,
        ) -> Result<&'a str, BackendError> {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    BackendError::InvalidParameter(format!(
                        "application '{}' has no {} configured",
                        app, field
                    ))
                })
        }

        Ok(DeployTarget {
            repo_name: required(&self.repo_name, "repository", &self.name)?,
            branch: required(&self.branch, "branch", &self.name)?,
            path: self.path.as_deref().ok_or_else(|| {
                BackendError::InvalidParameter(format!(
                    "application '{}' has no path configured",
                    self.name
                ))
            })?,
            server_name: required(&self.server_name, "server", &self.name)?,
        })
    }
}

impl Keyed for Application {
    fn key(&self) -> &str {
        &self.name
    }
}
