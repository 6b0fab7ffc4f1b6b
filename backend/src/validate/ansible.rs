//! Ansible validation

use std::time::Duration;

use tokio::fs;

use super::sandbox::SandboxJob;
use super::{failure_detail, TemplateValidator};
use crate::errors::BackendError;
use crate::models::validation::{ValidationRequest, ValidationResult};

const PLAYBOOK: &str = "playbook.yml";
const LINT_CONFIG: &str = ".config/ansible-lint.yml";

/// Cosmetic rules that never fail a playbook
const LINT_SKIP_LIST: &str = "skip_list:\n  - yaml[empty-lines]\n  - yaml[line-length]\n";

impl TemplateValidator {
    /// YAML parse, then `ansible-playbook --syntax-check`, then `ansible-lint`
    pub(super) async fn validate_ansible(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, BackendError> {
        if let Err(e) = serde_yaml::from_str::<serde_yaml::Value>(&request.content) {
            return Ok(ValidationResult::invalid(
                "Ansible YAML error",
                vec![e.to_string()],
            ));
        }

        let workspace = self.workspace("ansible-validate").await?;
        fs::write(workspace.join(PLAYBOOK), &request.content).await?;

        let timeout = Duration::from_secs(self.settings.ansible_timeout_secs);
        let syntax = self
            .run(SandboxJob::new(
                &self.settings.ansible_image,
                workspace.path(),
                &["ansible-playbook", "--syntax-check", PLAYBOOK],
                timeout,
            ))
            .await?;
        if !syntax.success() {
            return Ok(ValidationResult::invalid(
                "Ansible syntax error",
                vec![failure_detail(&syntax, timeout)],
            ));
        }

        let config = workspace.join(LINT_CONFIG);
        if let Some(parent) = config.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&config, LINT_SKIP_LIST).await?;

        let lint = self
            .run(SandboxJob::new(
                &self.settings.ansible_lint_image,
                workspace.path(),
                &["-c", LINT_CONFIG, PLAYBOOK],
                timeout,
            ))
            .await?;
        if !lint.success() {
            return Ok(ValidationResult::invalid(
                "Ansible-lint error",
                vec![failure_detail(&lint, timeout)],
            ));
        }

        Ok(ValidationResult::ok("Ansible: OK"))
    }
}
