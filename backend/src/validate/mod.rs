//! Template validation
//!
//! Templates are checked with their native tools inside a [`Sandbox`].
//! Terraform sets are additionally checked for declared RAM and CPU
//! against the last known capacity of the target server.

pub mod ansible;
pub mod bash;
pub mod resources;
pub mod sandbox;
pub mod terraform;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::BackendError;
use crate::filesys::workspace::Workspace;
use crate::models::validation::{ValidationRequest, ValidationResult};
use crate::monitor::ResourceMonitor;
use crate::storage::settings::ValidatorSettings;
use sandbox::{Sandbox, SandboxJob, SandboxOutcome};

/// Template families with a dedicated validation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Terraform,
    Ansible,
    Bash,
}

impl TemplateKind {
    /// Parse a validation type key; `None` for types without validation
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "terraform" => Some(TemplateKind::Terraform),
            "ansible" => Some(TemplateKind::Ansible),
            "bash" | "shell" => Some(TemplateKind::Bash),
            _ => None,
        }
    }

    /// Infer the kind from a file name
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".tf") || lower.ends_with(".tf.json") {
            Some(TemplateKind::Terraform)
        } else if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            Some(TemplateKind::Ansible)
        } else if lower.ends_with(".sh") {
            Some(TemplateKind::Bash)
        } else {
            None
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            TemplateKind::Terraform => "terraform",
            TemplateKind::Ansible => "ansible",
            TemplateKind::Bash => "bash",
        }
    }
}

/// Validates template sets
pub struct TemplateValidator {
    sandbox: Arc<dyn Sandbox>,
    monitor: Arc<ResourceMonitor>,
    settings: ValidatorSettings,
}

impl TemplateValidator {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        monitor: Arc<ResourceMonitor>,
        settings: ValidatorSettings,
    ) -> Self {
        Self {
            sandbox,
            monitor,
            settings,
        }
    }

    /// Validate `files` as templates of type `kind`
    ///
    /// The last file is the one being saved. Unknown types pass without
    /// validation.
    pub async fn validate(&self, kind: &str, files: &[ValidationRequest]) -> ValidationResult {
        let Some(kind) = TemplateKind::from_key(kind) else {
            return ValidationResult::ok("OK (no validation required)");
        };
        self.validate_kind(kind, files).await
    }

    pub async fn validate_kind(
        &self,
        kind: TemplateKind,
        files: &[ValidationRequest],
    ) -> ValidationResult {
        let Some(current) = files.last() else {
            return ValidationResult::invalid("No files to validate", Vec::new());
        };

        let result = match kind {
            TemplateKind::Terraform => self.validate_terraform(files).await,
            TemplateKind::Ansible => self.validate_ansible(current).await,
            TemplateKind::Bash => self.validate_bash(current).await,
        };

        match result {
            Ok(result) => {
                info!(
                    "Validated {} ({}): valid={}",
                    current.filename,
                    kind.key(),
                    result.valid()
                );
                result
            }
            Err(e) => {
                warn!("{} validation of {} failed: {}", kind.key(), current.filename, e);
                ValidationResult::invalid(format!("{} error: {}", kind.key(), e), vec![e.to_string()])
            }
        }
    }

    fn workspace_root(&self) -> PathBuf {
        self.settings.workspace_root()
    }

    async fn workspace(&self, prefix: &str) -> Result<Workspace, BackendError> {
        Workspace::create(&self.workspace_root(), prefix).await
    }

    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, BackendError> {
        self.sandbox.run(job).await
    }
}

/// Tool output of a failed run, or a timeout notice
fn failure_detail(outcome: &SandboxOutcome, timeout: Duration) -> String {
    match outcome {
        SandboxOutcome::TimedOut => format!("timed out after {}s", timeout.as_secs()),
        other => other.output(),
    }
}
