//! Shell script validation

use std::time::Duration;

use tokio::fs;

use super::sandbox::SandboxJob;
use super::{failure_detail, TemplateValidator};
use crate::errors::BackendError;
use crate::models::validation::{ValidationRequest, ValidationResult};

const SCRIPT: &str = "script.sh";

/// Convert CRLF and CR line endings to LF and end with a newline
pub fn normalize_script(content: &str) -> String {
    let mut cleaned = content.replace("\r\n", "\n").replace('\r', "\n");
    if !cleaned.ends_with('\n') {
        cleaned.push('\n');
    }
    cleaned
}

impl TemplateValidator {
    /// Static analysis with shellcheck
    pub(super) async fn validate_bash(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, BackendError> {
        let workspace = self.workspace("bash-validate").await?;
        fs::write(workspace.join(SCRIPT), normalize_script(&request.content)).await?;

        let timeout = Duration::from_secs(self.settings.shellcheck_timeout_secs);
        let outcome = self
            .run(SandboxJob::new(
                &self.settings.shellcheck_image,
                workspace.path(),
                &[SCRIPT],
                timeout,
            ))
            .await?;

        if outcome.success() {
            Ok(ValidationResult::ok("Bash: OK"))
        } else {
            Ok(ValidationResult::invalid(
                "Bash syntax error",
                vec![failure_detail(&outcome, timeout)],
            ))
        }
    }
}
