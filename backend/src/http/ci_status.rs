//! CI status of an application's generated workflow

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::authn::cipher::CredentialCipher;
use crate::errors::BackendError;
use crate::storage::registry::{ApplicationRegistry, RepositoryRegistry};
use crate::storage::settings::CiSettings;

/// Status reported when the workflow has never run on the branch
pub const NO_RUNS: &str = "no_runs";

/// Latest workflow run of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiStatus {
    pub repo_name: String,
    pub branch: String,
    pub html_url: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRuns {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

/// Queries the CI provider for workflow runs
pub struct CiStatusClient {
    client: Client,
    settings: CiSettings,
    applications: Arc<ApplicationRegistry>,
    repositories: Arc<RepositoryRegistry>,
    cipher: Arc<CredentialCipher>,
}

impl CiStatusClient {
    pub fn new(
        settings: CiSettings,
        applications: Arc<ApplicationRegistry>,
        repositories: Arc<RepositoryRegistry>,
        cipher: Arc<CredentialCipher>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("infraflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            settings,
            applications,
            repositories,
            cipher,
        })
    }

    /// Status of the most recent run of the generated workflow on the application's branch
    pub async fn status(&self, application: &str) -> Result<CiStatus, BackendError> {
        let app = self.applications.get(application).await?;
        let (repo_name, branch) = match (app.repo_name.as_deref(), app.branch.as_deref()) {
            (Some(repo), Some(branch)) if !repo.is_empty() && !branch.is_empty() => (repo, branch),
            _ => {
                return Err(BackendError::InvalidParameter(format!(
                    "application '{}' has no repository or branch configured",
                    application
                )))
            }
        };
        let repo = self.repositories.get(repo_name).await?;
        let (owner, name) = parse_owner_repo(&repo.repo_url)?;

        let url = format!(
            "{}/repos/{}/{}/actions/workflows/{}/runs",
            self.settings.api_base.trim_end_matches('/'),
            owner,
            name,
            self.settings.workflow_file
        );
        debug!("GET {} (branch {})", url, branch);

        let mut request = self
            .client
            .get(&url)
            .query(&[("branch", branch), ("per_page", "1")])
            .header(header::ACCEPT, "application/vnd.github+json");
        let token = self.cipher.decrypt(&repo.token)?;
        if !token.expose_secret().is_empty() {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("CI status request failed: {} - {}", status, body);
            return Err(BackendError::Transport(format!(
                "CI provider returned {}: {}",
                status, body
            )));
        }

        let runs: WorkflowRuns = response.json().await?;
        let latest = runs.workflow_runs.into_iter().next();
        Ok(CiStatus {
            repo_name: repo_name.to_string(),
            branch: branch.to_string(),
            html_url: latest.as_ref().and_then(|run| run.html_url.clone()),
            status: run_status(latest.as_ref()),
        })
    }
}

/// `owner` and `repo` of `https://<host>/<owner>/<repo>[.git]`
pub fn parse_owner_repo(repo_url: &str) -> Result<(String, String), BackendError> {
    let invalid = || BackendError::InvalidParameter(format!("unsupported repository URL: {}", repo_url));
    let url = Url::parse(repo_url).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            if repo.is_empty() {
                return Err(invalid());
            }
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(invalid()),
    }
}

fn run_status(run: Option<&WorkflowRun>) -> String {
    match run {
        None => NO_RUNS.to_string(),
        Some(run) => run
            .conclusion
            .clone()
            .or_else(|| run.status.clone())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
