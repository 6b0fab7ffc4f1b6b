//! Terraform validation

use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::resources::{check_capacity, ResourceAccounting};
use super::sandbox::SandboxJob;
use super::{failure_detail, TemplateValidator};
use crate::errors::BackendError;
use crate::models::validation::{ValidationRequest, ValidationResult};

impl TemplateValidator {
    /// Syntax per file, then `init` and `validate` over the set, then resource accounting
    pub(super) async fn validate_terraform(
        &self,
        files: &[ValidationRequest],
    ) -> Result<ValidationResult, BackendError> {
        let workspace = self.workspace("tf-validate").await?;
        for file in files {
            let relative = file.filename.trim_start_matches('/');
            if relative.split('/').any(|p| p == "..") {
                return Ok(ValidationResult::invalid(
                    format!("Invalid file name: {}", file.filename),
                    Vec::new(),
                ));
            }
            let target = workspace.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, &file.content).await?;
        }

        if let Some((name, detail)) = self.find_invalid_syntax(workspace.path()).await? {
            return Ok(ValidationResult::invalid(
                format!("Terraform syntax error in file: {}", name),
                vec![detail],
            ));
        }

        let phase_timeout = Duration::from_secs(self.settings.validate_timeout_secs);
        for (phase, args) in [
            ("init", vec!["init", "-backend=false", "-input=false", "-no-color"]),
            ("validate", vec!["validate", "-no-color"]),
        ] {
            let job = SandboxJob::new(
                &self.settings.terraform_image,
                workspace.path(),
                &args,
                phase_timeout,
            )
            .env("TF_IN_AUTOMATION", "1");
            let outcome = self.run(job).await?;
            debug!("terraform {}: {}", phase, outcome.output());
            if !outcome.success() {
                return Ok(ValidationResult::invalid(
                    format!("Terraform {} failed", phase),
                    vec![failure_detail(&outcome, phase_timeout)],
                ));
            }
        }

        Ok(self.account_resources(files).await)
    }

    /// First `.tf` file rejected by `terraform fmt -check`, with the tool output
    async fn find_invalid_syntax(
        &self,
        root: &Path,
    ) -> Result<Option<(String, String)>, BackendError> {
        let timeout = Duration::from_secs(self.settings.fmt_timeout_secs);
        let files: Vec<_> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tf"))
            .map(|e| e.into_path())
            .collect();

        for path in files {
            let Some(dir) = path.parent() else { continue };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let job = SandboxJob::new(
                &self.settings.terraform_image,
                dir,
                &["fmt", "-check", "-no-color", &name],
                timeout,
            );
            let outcome = self.run(job).await?;
            if !outcome.success() {
                return Ok(Some((name, failure_detail(&outcome, timeout))));
            }
        }
        Ok(None)
    }

    /// Conflict warnings over the whole set, plus the capacity check of the last file
    async fn account_resources(&self, files: &[ValidationRequest]) -> ValidationResult {
        let accounting = ResourceAccounting::new(files);
        let conflicts = accounting.conflicts();
        let warnings: Vec<String> = conflicts
            .iter()
            .map(|name| format!("Conflicting values declared for variable '{}'", name))
            .collect();

        let server = files
            .last()
            .and_then(|f| f.server_name.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(server) = server {
            if let Some(capacity) = self.monitor.snapshot(server).await {
                let (current, others) = accounting.current_and_others();
                info!(
                    "Capacity of {}: {} MB total, {} MB used; others {} MB / {} vCPU; current {} MB / {} vCPU",
                    server,
                    capacity.total_ram_mb,
                    capacity.used_ram_mb,
                    others.ram_mb,
                    others.cpu,
                    current.ram_mb,
                    current.cpu
                );
                if let Some(message) = check_capacity(&capacity, &current, &others) {
                    return ValidationResult::invalid(message.clone(), vec![message])
                        .with_warnings(warnings);
                }
            } else {
                debug!("No capacity snapshot for {}, skipping capacity check", server);
            }
        }

        if conflicts.is_empty() {
            ValidationResult::ok("Terraform: OK")
        } else {
            ValidationResult::ok(format!(
                "Terraform: OK, but conflicting variable values found: {}",
                conflicts.join(", ")
            ))
            .with_warnings(warnings)
        }
    }
}
