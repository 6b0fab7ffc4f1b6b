//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Inline credential identity; the identity file is used when absent
    #[serde(default)]
    pub encryption_identity: Option<String>,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub validator: ValidatorSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub ci: CiSettings,
}

/// Git content store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Path to the git binary
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Upper bound for a single git invocation, in seconds
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_committer_name")]
    pub committer_name: String,

    #[serde(default = "default_committer_email")]
    pub committer_email: String,

    /// Directory holding ephemeral workspaces; the system temp dir when absent
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_git_timeout() -> u64 {
    120
}

fn default_committer_name() -> String {
    "infraflow".to_string()
}

fn default_committer_email() -> String {
    "infraflow@localhost".to_string()
}

impl GitSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
            workspace_root: None,
        }
    }
}

/// Template validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_terraform_image")]
    pub terraform_image: String,

    #[serde(default = "default_ansible_image")]
    pub ansible_image: String,

    #[serde(default = "default_ansible_lint_image")]
    pub ansible_lint_image: String,

    #[serde(default = "default_shellcheck_image")]
    pub shellcheck_image: String,

    /// Per-file `terraform fmt` timeout, in seconds
    #[serde(default = "default_fmt_timeout")]
    pub fmt_timeout_secs: u64,

    /// `terraform init` and `terraform validate` timeout, in seconds
    #[serde(default = "default_phase_timeout")]
    pub validate_timeout_secs: u64,

    #[serde(default = "default_phase_timeout")]
    pub ansible_timeout_secs: u64,

    #[serde(default = "default_shellcheck_timeout")]
    pub shellcheck_timeout_secs: u64,

    /// Directory holding validation workspaces; the system temp dir when absent
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_terraform_image() -> String {
    "hashicorp/terraform:light".to_string()
}

fn default_ansible_image() -> String {
    "willhallonline/ansible:latest".to_string()
}

fn default_ansible_lint_image() -> String {
    "cytopia/ansible-lint".to_string()
}

fn default_shellcheck_image() -> String {
    "koalaman/shellcheck".to_string()
}

fn default_fmt_timeout() -> u64 {
    5
}

fn default_phase_timeout() -> u64 {
    20
}

fn default_shellcheck_timeout() -> u64 {
    15
}

impl ValidatorSettings {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            terraform_image: default_terraform_image(),
            ansible_image: default_ansible_image(),
            ansible_lint_image: default_ansible_lint_image(),
            shellcheck_image: default_shellcheck_image(),
            fmt_timeout_secs: default_fmt_timeout(),
            validate_timeout_secs: default_phase_timeout(),
            ansible_timeout_secs: default_phase_timeout(),
            shellcheck_timeout_secs: default_shellcheck_timeout(),
            workspace_root: None,
        }
    }
}

/// Remote shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Helper feeding the password from the `SSHPASS` environment variable
    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for short commands (uploads, health checks)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for the remote `deploy.sh` run
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_sshpass_binary() -> String {
    "sshpass".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    60
}

fn default_deploy_timeout() -> u64 {
    1800
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            sshpass_binary: default_sshpass_binary(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            deploy_timeout_secs: default_deploy_timeout(),
        }
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Whether the monitor worker runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Polling interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_monitor_interval() -> u64 {
    60
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_monitor_interval(),
        }
    }
}

/// Auto-sync recheck settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Whether `auto` applications are rechecked periodically
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Recheck interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_monitor_interval(),
        }
    }
}

/// CI provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Workflow file name the orchestrator generates
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,

    #[serde(default = "default_ci_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_workflow_file() -> String {
    "deploy.yml".to_string()
}

fn default_ci_timeout() -> u64 {
    30
}

impl Default for CiSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            workflow_file: default_workflow_file(),
            timeout_secs: default_ci_timeout(),
        }
    }
}
