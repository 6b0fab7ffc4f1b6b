//! Validation models

use serde::{Deserialize, Serialize};

/// A request to validate one template, optionally against a server's capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub server_name: Option<String>,
}

impl ValidationRequest {
    pub fn new(filename: &str, content: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content: content.to_string(),
            server_name: None,
        }
    }

    pub fn with_server(mut self, server_name: &str) -> Self {
        self.server_name = Some(server_name.to_string());
        self
    }

    /// File extension in lower case, empty if none
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Outcome of a validation
///
/// `valid` is false iff at least one blocking problem was found. Warnings
/// never affect validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    output: String,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            valid: true,
            output: output.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(output: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            valid: false,
            output: output.into(),
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// A validated write into a repository branch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSaveRequest {
    /// Repository-relative path of the file
    pub path: String,
    pub content: String,
    pub message: String,
    #[serde(default)]
    pub server_name: Option<String>,
    /// Other files of the same template set, as currently edited
    #[serde(default)]
    pub other_files: Vec<ValidationRequest>,
}
