//! Repository connection models

use serde::{Deserialize, Serialize};

use crate::storage::registry::Keyed;

/// Result of the last connection check against a remote repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositoryStatus {
    #[default]
    Unknown,
    Successful,
    Error,
}

/// A git remote the backend is allowed to read and write
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConnection {
    /// Unique name
    pub name: String,

    /// Remote URL (https, ssh, file or a local path)
    pub repo_url: String,

    /// Default branch
    pub branch: String,

    /// Username for HTTP(S) authentication
    #[serde(default)]
    pub username: String,

    /// Access token, encrypted with the credential cipher
    #[serde(default)]
    pub token: String,

    /// Last observed status
    #[serde(default)]
    pub status: RepositoryStatus,
}

impl RepositoryConnection {
    pub fn new(name: &str, repo_url: &str, branch: &str) -> Self {
        Self {
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            username: String::new(),
            token: String::new(),
            status: RepositoryStatus::Unknown,
        }
    }
}

impl Keyed for RepositoryConnection {
    fn key(&self) -> &str {
        &self.name
    }
}

/// One entry of a branch history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}
