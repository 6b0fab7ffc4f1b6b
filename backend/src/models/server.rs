//! Target server models

use serde::{Deserialize, Serialize};

use crate::storage::registry::Keyed;

/// Reachability of a target server as last observed over SSH
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    #[default]
    Unknown,
    Successful,
    Error,
}

/// A deployment target reachable over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Unique name
    pub name: String,

    /// Host name or address
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Administrative user
    pub username: String,

    /// Password, encrypted with the credential cipher
    #[serde(default)]
    pub password: String,

    /// Last observed status
    #[serde(default)]
    pub status: ServerStatus,

    /// Last observed CPU utilisation, e.g. `"12.5%"`
    #[serde(default = "unknown_load")]
    pub cpu: String,

    /// Last observed memory as `"<used>/<total> MB"`
    #[serde(default = "unknown_load")]
    pub ram: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn unknown_load() -> String {
    "-".to_string()
}

impl ServerProfile {
    pub fn new(name: &str, host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            status: ServerStatus::Unknown,
            cpu: unknown_load(),
            ram: unknown_load(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == ServerStatus::Successful
    }

    /// Directory holding the deployed artifacts of an application
    pub fn app_dir(&self, application: &str) -> String {
        format!("/home/{}/apps/{}", self.username, application)
    }
}

impl Keyed for ServerProfile {
    fn key(&self) -> &str {
        &self.name
    }
}
