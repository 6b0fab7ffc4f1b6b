//! Finite State Machine for a single deployment attempt

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Artifacts are being generated
    Generating,

    /// Artifacts are committed to the branch
    Pushed,

    /// Scripts are uploaded and running on the server
    Deploying,

    /// Remote execution succeeded
    Succeeded,

    /// Remote execution failed and the artifact commit was reverted
    RolledBack,

    /// Failed with nothing to compensate, or the compensation itself failed
    Failed,
}

impl DeploymentState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Succeeded | DeploymentState::RolledBack | DeploymentState::Failed
        )
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Artifacts pushed; carries the commit, `None` when the branch already had them
    Pushed(Option<String>),

    /// Upload and remote execution started
    Deploy,

    /// Remote execution exited with zero
    DeploySuccess,

    /// Remote execution failed and the artifact commit was reverted
    RolledBack(String),

    /// Unrecoverable failure
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    commit: Option<String>,
    error: Option<String>,
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentFsm {
    /// Create a new FSM in generating state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Generating,
            commit: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Commit holding the pushed artifacts
    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, event) {
            (DeploymentState::Generating, DeploymentEvent::Pushed(commit)) => {
                self.commit = commit;
                DeploymentState::Pushed
            }

            (DeploymentState::Pushed, DeploymentEvent::Deploy) => DeploymentState::Deploying,

            (DeploymentState::Deploying, DeploymentEvent::DeploySuccess) => {
                DeploymentState::Succeeded
            }
            (DeploymentState::Deploying, DeploymentEvent::RolledBack(err)) => {
                self.error = Some(err);
                DeploymentState::RolledBack
            }

            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err);
                DeploymentState::Failed
            }

            (state, event) => {
                return Err(format!(
                    "Invalid transition from {:?} with event {:?}",
                    state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
