//! Validated file saves

use std::sync::Arc;

use tracing::info;

use crate::errors::BackendError;
use crate::git::store::GitContentStore;
use crate::models::repository::RepositoryConnection;
use crate::models::validation::{FileSaveRequest, ValidationRequest, ValidationResult};
use crate::validate::{TemplateKind, TemplateValidator};

/// Writes a template to a branch only if it validates
pub struct FileSaveService {
    store: Arc<GitContentStore>,
    validator: Arc<TemplateValidator>,
}

impl FileSaveService {
    pub fn new(store: Arc<GitContentStore>, validator: Arc<TemplateValidator>) -> Self {
        Self { store, validator }
    }

    /// Validate the file together with its set, then push it
    ///
    /// An invalid template is returned as data and nothing is pushed.
    pub async fn save_file(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        request: &FileSaveRequest,
    ) -> Result<ValidationResult, BackendError> {
        let path = request.path.trim().trim_matches('/');
        let (folder, filename) = path.rsplit_once('/').unwrap_or(("", path));
        if filename.is_empty() {
            return Err(BackendError::InvalidParameter("empty file name".to_string()));
        }

        let mut warnings = Vec::new();
        if let Some(kind) = TemplateKind::from_filename(filename) {
            let mut files: Vec<ValidationRequest> = request
                .other_files
                .iter()
                .filter(|f| f.filename.trim_matches('/') != path)
                .cloned()
                .collect();
            files.push(ValidationRequest {
                filename: path.to_string(),
                content: request.content.clone(),
                server_name: request.server_name.clone(),
            });

            let result = self.validator.validate_kind(kind, &files).await;
            if !result.valid() {
                info!("Rejected save of {}: {}", path, result.output());
                return Ok(result);
            }
            warnings = result.warnings().to_vec();
        }

        self.store
            .push_file(repo, branch, folder, filename, &request.content, &request.message)
            .await?;
        info!("Saved {} to {}/{}", path, repo.name, branch);
        Ok(ValidationResult::ok("File saved to git").with_warnings(warnings))
    }
}
